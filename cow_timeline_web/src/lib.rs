use leptos::*;

use cow_timeline::sheet::ensure_csv_body;
use cow_timeline::{
    build_timeline, export_csv_url, parse_sheet_url, parse_table, plotly_figure,
    write_intervals_csv, FigureOptions, Language, ParseOptions, Profile, Table, Timeline,
    TimelineParams,
};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, FileList, HtmlInputElement};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("COW_TIMELINE_COMMIT");
const PLOT_DIV: &str = "timeline_plot";

#[derive(Clone)]
struct LoadedSheet {
    name: String,
    table: Table,
}

async fn read_file(file: web_sys::File) -> Option<(String, Vec<u8>)> {
    let name = file.name();
    let buf = JsFuture::from(file.array_buffer()).await.ok()?;
    let bytes = js_sys::Uint8Array::new(&buf).to_vec();
    Some((name, bytes))
}

async fn read_first_file(list: &FileList) -> Option<(String, Vec<u8>)> {
    read_file(list.item(0)?).await
}

fn js_error(value: JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

/// Download the CSV export of a public sheet through the browser `fetch` API.
async fn fetch_sheet(url: &str) -> Result<Vec<u8>, String> {
    let sheet = parse_sheet_url(url).map_err(|e| e.to_string())?;
    let export = export_csv_url(&sheet);
    let window = web_sys::window().ok_or_else(|| "no browser window".to_string())?;
    let response = JsFuture::from(window.fetch_with_str(&export))
        .await
        .map_err(js_error)?;
    let response: web_sys::Response = response.dyn_into().map_err(js_error)?;
    if !response.ok() {
        return Err(format!("Google Sheets answered HTTP {}", response.status()));
    }
    let buf = JsFuture::from(response.array_buffer().map_err(js_error)?)
        .await
        .map_err(js_error)?;
    let bytes = js_sys::Uint8Array::new(&buf).to_vec();
    ensure_csv_body(&bytes).map_err(|e| e.to_string())?;
    Ok(bytes)
}

#[cfg(feature = "chart_plotly")]
fn plot_figure(div_id: &str, figure: &serde_json::Value) {
    use serde::Serialize;

    // Plain JS objects; the default serializer would emit `Map`s, which Plotly ignores.
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    let (Ok(data), Ok(layout)) = (
        figure["data"].serialize(&serializer),
        figure["layout"].serialize(&serializer),
    ) else {
        return;
    };
    let Some(div) = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(div_id))
    else {
        return;
    };
    let plotly = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Plotly"))
        .unwrap_or(JsValue::UNDEFINED);
    if let Ok(func) = js_sys::Reflect::get(&plotly, &JsValue::from_str("react"))
        .or_else(|_| js_sys::Reflect::get(&plotly, &JsValue::from_str("newPlot")))
        .and_then(|v| v.dyn_into::<js_sys::Function>())
    {
        let _ = func.call3(&JsValue::NULL, &JsValue::from(div), &data, &layout);
    }
}

/// Remove any chart from the div so a failed rebuild leaves nothing stale behind.
#[cfg(feature = "chart_plotly")]
fn clear_plot(div_id: &str) {
    let Some(div) = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(div_id))
    else {
        return;
    };
    let plotly = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Plotly"))
        .unwrap_or(JsValue::UNDEFINED);
    if let Ok(func) = js_sys::Reflect::get(&plotly, &JsValue::from_str("purge"))
        .and_then(|v| v.dyn_into::<js_sys::Function>())
    {
        let _ = func.call1(&JsValue::NULL, &JsValue::from(div.clone()));
    }
    div.set_inner_html("");
}

#[cfg(not(feature = "chart_plotly"))]
fn plot_figure(_div_id: &str, _figure: &serde_json::Value) {}

#[cfg(not(feature = "chart_plotly"))]
fn clear_plot(_div_id: &str) {}

fn blob_url_from_bytes(bytes: &[u8]) -> Option<String> {
    let parts = js_sys::Array::new();
    parts.push(&js_sys::Uint8Array::from(bytes));
    let blob = Blob::new_with_u8_array_sequence(&parts).ok()?;
    web_sys::Url::create_object_url_with_blob(&blob).ok()
}

fn subject_label(table: &Table, profile: &Profile, column: usize) -> String {
    let header = table.columns.get(column).map(String::as_str).unwrap_or("?");
    match profile.alias_for_column(column) {
        Some(alias) if alias != header => format!("{alias} [{header}]"),
        _ => header.to_string(),
    }
}

/// Chart options for the selected cow, titled by its profile alias when it has one.
fn figure_options(
    profile: &Profile,
    language: Language,
    day_lines: bool,
    column: Option<usize>,
) -> FigureOptions {
    FigureOptions {
        language,
        day_lines,
        subject_label: column
            .and_then(|column| profile.alias_for_column(column))
            .map(str::to_string),
        ..FigureOptions::default()
    }
}

/// The timeline to chart; anything else clears the plot.
fn drawable(timeline: &Option<Result<Timeline, String>>) -> Option<&Timeline> {
    match timeline {
        Some(Ok(timeline)) => Some(timeline),
        _ => None,
    }
}

fn fmt_hms(secs: i64) -> String {
    let total = secs.max(0);
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{}:{:02}:{:02}", h, m, s)
}

#[component]
pub fn App() -> impl IntoView {
    let profile = store_value(Profile::default());
    let (sheet, set_sheet) = create_signal(Option::<LoadedSheet>::None);
    let (sheet_url, set_sheet_url) = create_signal(String::new());
    let (busy, set_busy) = create_signal(false);
    let (status, set_status) = create_signal(String::from(
        "Paste a Google Sheets link or upload a CSV file.",
    ));
    let (subject, set_subject) = create_signal(Option::<usize>::None);
    let (language, set_language) = create_signal(Language::Thai);
    let (present_only, set_present_only) = create_signal(false);
    let (day_lines, set_day_lines) = create_signal(true);
    let (csv_href, set_csv_href) = create_signal(String::new());

    let load_bytes = move |name: String, bytes: Vec<u8>| {
        match parse_table(&bytes, &ParseOptions::default()) {
            Ok(table) => {
                set_status.set(format!(
                    "Loaded {name}: {} rows ({} without a readable timestamp).",
                    table.observations.len(),
                    table.dropped_rows
                ));
                set_subject.set(table.default_subject().ok());
                set_sheet.set(Some(LoadedSheet { name, table }));
            }
            Err(err) => {
                set_sheet.set(None);
                set_subject.set(None);
                set_status.set(format!("Could not read {name}: {err}"));
            }
        }
    };

    let subjects = create_memo(move |_| {
        sheet.with(|loaded| match loaded {
            Some(loaded) => profile.with_value(|p| {
                loaded
                    .table
                    .subject_columns()
                    .into_iter()
                    .map(|column| (column, subject_label(&loaded.table, p, column)))
                    .collect::<Vec<_>>()
            }),
            None => Vec::new(),
        })
    });

    let timeline = create_memo(move |_| -> Option<Result<Timeline, String>> {
        let column = subject.get()?;
        let params = TimelineParams {
            present_only: present_only.get(),
            ..TimelineParams::default()
        };
        sheet.with(|loaded| {
            loaded.as_ref().map(|loaded| {
                profile.with_value(|p| {
                    build_timeline(&loaded.table, column, p, &params).map_err(|e| e.to_string())
                })
            })
        })
    });

    // Redraw whenever the timeline or the display options change.
    create_effect(move |_| {
        let (language, day_lines, column) = (language.get(), day_lines.get(), subject.get());
        timeline.with(|t| match drawable(t) {
            Some(t) => {
                let figure = profile.with_value(|p| {
                    let opts = figure_options(p, language, day_lines, column);
                    plotly_figure(t, &p.behaviors, &opts)
                });
                plot_figure(PLOT_DIV, &figure);
            }
            None => clear_plot(PLOT_DIV),
        });
    });

    create_effect(move |_| {
        let old = csv_href.get_untracked();
        if !old.is_empty() {
            let _ = web_sys::Url::revoke_object_url(&old);
        }
        let href = timeline.with(|t| match t {
            Some(Ok(t)) => {
                let mut buf = Vec::new();
                profile
                    .with_value(|p| write_intervals_csv(t, &p.behaviors, &mut buf))
                    .ok()
                    .and_then(|_| blob_url_from_bytes(&buf))
            }
            _ => None,
        });
        set_csv_href.set(href.unwrap_or_default());
    });

    let on_fetch = move |_ev: leptos::ev::MouseEvent| {
        if busy.get_untracked() {
            return;
        }
        let url = sheet_url.get_untracked().trim().to_string();
        if url.is_empty() {
            set_status.set("Enter a Google Sheets link first.".to_string());
            return;
        }
        set_busy.set(true);
        set_status.set("Fetching sheet…".to_string());
        spawn_local(async move {
            match fetch_sheet(&url).await {
                Ok(bytes) => load_bytes("Google Sheet".to_string(), bytes),
                Err(err) => set_status.set(format!("Could not fetch the sheet: {err}")),
            }
            set_busy.set(false);
        });
    };

    let on_file = move |ev: leptos::ev::Event| {
        let Some(input) = ev
            .target()
            .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
        else {
            return;
        };
        let Some(files) = input.files() else {
            return;
        };
        set_status.set("Reading file…".to_string());
        spawn_local(async move {
            match read_first_file(&files).await {
                Some((name, bytes)) => load_bytes(name, bytes),
                None => set_status.set("No file selected.".to_string()),
            }
            input.set_value("");
        });
    };

    let on_drop = move |ev: leptos::ev::DragEvent| {
        ev.prevent_default();
        let Some(files) = ev.data_transfer().and_then(|dt| dt.files()) else {
            return;
        };
        spawn_local(async move {
            if let Some((name, bytes)) = read_first_file(&files).await {
                load_bytes(name, bytes);
            }
        });
    };

    let total_rows = move || -> Vec<(String, usize, String, String)> {
        let lang = language.get();
        timeline.with(|t| match t {
            Some(Ok(t)) => profile.with_value(|p| {
                t.totals()
                    .into_iter()
                    .map(|total| {
                        (
                            p.behaviors.display(total.behavior, lang).to_string(),
                            total.count,
                            fmt_hms(total.total_seconds),
                            format!("{:.1}%", total.share * 100.0),
                        )
                    })
                    .collect()
            }),
            _ => Vec::new(),
        })
    };

    let timeline_error = move || {
        timeline.with(|t| match t {
            Some(Err(err)) => err.clone(),
            _ => String::new(),
        })
    };

    let download_name = move || {
        sheet.with(|loaded| match loaded {
            Some(loaded) => format!("{}_intervals.csv", loaded.name.trim_end_matches(".csv")),
            None => "intervals.csv".to_string(),
        })
    };

    view! {
        <main class="tufte" on:dragover=move |e| { e.prevent_default(); } on:drop=on_drop>
            <header>
                <h1>"Behavior Summarizer"</h1>
                <p class="subtitle">"Gantt-style timelines of recorded cow behavior."</p>
                <p class="note">{"Web version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </header>
            <section class="files">
                <h3>"How to use"</h3>
                <p class="note">
                    "Share the Google Sheet as \"Anyone with the link can view\" and paste its link, or upload the CSV export. The sheet needs a date column, a time column (dd-mm-yyyy and hh.mm.ss) and one column per cow holding the recorded behavior."
                </p>
            </section>
            <section class="controls">
                <div class="control-row">
                    <input type="url" placeholder="https://docs.google.com/spreadsheets/d/…" prop:value=move || sheet_url.get()
                        on:input=move |ev| set_sheet_url.set(event_target_value(&ev)) />
                    <button class="btn" on:click=on_fetch disabled=move || busy.get()>"Load sheet"</button>
                </div>
                <label class="dropzone">
                    <span>"Drag & drop or click to choose a CSV file"</span>
                    <input id="file_input" type="file" accept=".csv,text/csv" on:change=on_file />
                </label>
                <div class="control-row">
                    <label class="note">"Cow:"</label>
                    <select
                        prop:value=move || subject.get().map(|c| c.to_string()).unwrap_or_default()
                        on:change=move |ev| set_subject.set(event_target_value(&ev).parse::<usize>().ok())
                    >
                        {move || subjects.get().into_iter().map(|(column, label)| view! {
                            <option value=column.to_string()>{label}</option>
                        }).collect_view()}
                    </select>
                    <label class="note">"Labels:"</label>
                    <select on:change=move |ev| {
                        let lang = if event_target_value(&ev) == "en" { Language::English } else { Language::Thai };
                        set_language.set(lang);
                    }>
                        <option value="th">"ไทย"</option>
                        <option value="en">"English"</option>
                    </select>
                </div>
                <div class="control-row">
                    <label><input type="checkbox" prop:checked=move || present_only.get()
                        on:change=move |ev| set_present_only.set(event_target_checked(&ev)) />" Only behaviors present"</label>
                    <label><input type="checkbox" prop:checked=move || day_lines.get()
                        on:change=move |ev| set_day_lines.set(event_target_checked(&ev)) />" Day boundaries"</label>
                </div>
                <span class="note">{move || status.get()}</span>
                <span class="note error">{timeline_error}</span>
            </section>
            <section class="plots">
                <div id=PLOT_DIV class="plot"></div>
            </section>
            <section class="files">
                <table class="totals">
                    <thead><tr><th>"Behavior"</th><th>"Bouts"</th><th>"Time"</th><th>"Share"</th></tr></thead>
                    <tbody>
                        {move || total_rows().into_iter().map(|(name, count, time, share)| view! {
                            <tr><td>{name}</td><td>{count}</td><td>{time}</td><td>{share}</td></tr>
                        }).collect_view()}
                    </tbody>
                </table>
                <p class="note">"Uploaded files are processed in your browser and never leave your device."</p>
            </section>
            <section class="downloads">
                <a id="dl_intervals" href=move || csv_href.get() download=download_name
                    style=move || if csv_href.get().is_empty() {"display:none;".to_string()} else {"display:inline;".to_string()}>"Download intervals CSV"</a>
            </section>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "chart_plotly")]
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "date,time,cow1,cow2\n\
        01-03-2024,08.00.00,ยืน,เดิน\n\
        01-03-2024,09.00.00,กิน,เดิน\n\
        01-03-2024,10.00.00,นอน,เดิน\n";

    fn timeline_for(column: usize) -> Option<Result<Timeline, String>> {
        let table = parse_table(SHEET.as_bytes(), &ParseOptions::default()).unwrap();
        Some(
            build_timeline(&table, column, &Profile::default(), &TimelineParams::default())
                .map_err(|e| e.to_string()),
        )
    }

    #[test]
    fn test_failed_rebuild_clears_chart() {
        let ok = timeline_for(2);
        assert_eq!(drawable(&ok).map(|t| t.subject.as_str()), Some("cow1"));

        // cow2 only has unrecognised labels.
        let failed = timeline_for(3);
        assert!(matches!(failed, Some(Err(_))));
        assert!(drawable(&failed).is_none());
        assert!(drawable(&None).is_none());
    }

    #[test]
    fn test_chart_title_uses_alias() {
        let profile = Profile::default();
        let Some(Ok(timeline)) = timeline_for(2) else {
            panic!("cow1 should chart");
        };
        let opts = figure_options(&profile, Language::English, true, Some(2));
        assert_eq!(
            opts.labels(&timeline).title,
            "Behavior Timeline of cow-a (black)"
        );
        let plain = figure_options(&profile, Language::English, true, Some(9));
        assert_eq!(plain.labels(&timeline).title, "Behavior Timeline of cow1");
    }
}
