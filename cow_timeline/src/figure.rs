//! Chart model shared by the front ends: colors, theme, axis text and the
//! Plotly figure JSON.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::behavior::{BehaviorSet, Language};
use crate::timeline::Timeline;

/// Plotly's sequential Viridis scale.
const VIRIDIS: [(u8, u8, u8); 10] = [
    (0x44, 0x01, 0x54),
    (0x48, 0x28, 0x78),
    (0x3e, 0x49, 0x89),
    (0x31, 0x68, 0x8e),
    (0x26, 0x82, 0x8e),
    (0x1f, 0x9e, 0x89),
    (0x35, 0xb7, 0x79),
    (0x6e, 0xce, 0x58),
    (0xb5, 0xde, 0x2b),
    (0xfd, 0xe7, 0x25),
];

const PLOTLY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Tick format for the time axis (d3 syntax for Plotly, strftime for chrono).
pub const TICK_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Color for a behavior ordinal out of `count` behaviors. Keyed on the stable
/// ordinal, so a behavior keeps its color whichever subset is charted.
pub fn viridis(ordinal: usize, count: usize) -> Rgb {
    let t = if count <= 1 {
        0.0
    } else {
        (ordinal.min(count - 1) as f64) / ((count - 1) as f64)
    };
    let scaled = t * (VIRIDIS.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(VIRIDIS.len() - 1);
    let frac = scaled - lo as f64;
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (a, b) = (VIRIDIS[lo], VIRIDIS[hi]);
    Rgb(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Dark dashboard styling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Theme {
    pub background: Rgb,
    pub foreground: Rgb,
    pub font_size: u32,
    pub height: u32,
    /// Left, right, top, bottom.
    pub margin: (u32, u32, u32, u32),
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Rgb(0, 0, 0),
            foreground: Rgb(255, 255, 255),
            font_size: 12,
            height: 600,
            margin: (40, 40, 40, 100),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisLabels {
    pub title: String,
    pub x: String,
    pub y: String,
}

impl AxisLabels {
    pub fn for_language(language: Language, subject: &str) -> Self {
        let (x, y) = match language {
            Language::Thai => ("วันที่ & เวลา", "พฤติกรรม"),
            Language::English => ("Date & Time", "Behavior"),
        };
        Self {
            title: format!("Behavior Timeline of {subject}"),
            x: x.to_string(),
            y: y.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FigureOptions {
    pub language: Language,
    /// Dotted vertical line at each midnight.
    pub day_lines: bool,
    /// Name used in the title; defaults to the column header.
    pub subject_label: Option<String>,
    pub theme: Theme,
}

impl FigureOptions {
    pub fn labels(&self, timeline: &Timeline) -> AxisLabels {
        let subject = self
            .subject_label
            .as_deref()
            .unwrap_or(timeline.subject.as_str());
        AxisLabels::for_language(self.language, subject)
    }
}

/// Plotly figure (`{"data": [...], "layout": {...}}`) with one horizontal bar
/// trace per charted behavior.
pub fn plotly_figure(
    timeline: &Timeline,
    behaviors: &BehaviorSet,
    options: &FigureOptions,
) -> JsonValue {
    let theme = &options.theme;
    let fg = theme.foreground.hex();
    let labels = options.labels(timeline);
    let rows = timeline.axis.len();

    let mut traces = Vec::with_capacity(rows);
    for (position, &behavior) in timeline.axis.iter().enumerate() {
        let entries: Vec<_> = timeline
            .entries
            .iter()
            .filter(|e| e.behavior == behavior)
            .collect();
        if entries.is_empty() {
            continue;
        }
        let name = behaviors.display(behavior, options.language);
        traces.push(json!({
            "type": "bar",
            "orientation": "h",
            "name": name,
            "base": entries.iter().map(|e| plotly_time(e.start)).collect::<Vec<_>>(),
            "x": entries.iter().map(|e| e.duration().num_milliseconds()).collect::<Vec<_>>(),
            "y": vec![position; entries.len()],
            "customdata": entries.iter().map(|e| plotly_time(e.end)).collect::<Vec<_>>(),
            "marker": { "color": viridis(behavior, behaviors.len()).hex() },
            "hovertemplate": format!("{name}<br>%{{base}} → %{{customdata}}<extra></extra>"),
        }));
    }

    let ticktext: Vec<&str> = timeline
        .axis
        .iter()
        .map(|&b| behaviors.display(b, options.language))
        .collect();

    let mut shapes = Vec::new();
    if let Some((start, end)) = timeline.span() {
        let top = rows as f64 - 0.5;
        let frame = [
            (start, -0.5, end, -0.5),
            (start, top, end, top),
            (start, -0.5, start, top),
            (end, -0.5, end, top),
        ];
        for (x0, y0, x1, y1) in frame {
            shapes.push(line_shape(x0, y0, x1, y1, &fg, "solid"));
        }
        if options.day_lines {
            for &midnight in &timeline.day_boundaries {
                shapes.push(line_shape(midnight, -0.5, midnight, top, &fg, "dot"));
            }
        }
    }

    let axis_font = json!({ "color": fg });
    let (ml, mr, mt, mb) = theme.margin;
    json!({
        "data": traces,
        "layout": {
            "title": { "text": labels.title },
            "height": theme.height,
            "autosize": true,
            "barmode": "overlay",
            "margin": { "l": ml, "r": mr, "t": mt, "b": mb },
            "plot_bgcolor": theme.background.hex(),
            "paper_bgcolor": theme.background.hex(),
            "font": { "size": theme.font_size, "color": fg },
            "xaxis": {
                "type": "date",
                "title": { "text": labels.x, "font": axis_font },
                "tickformat": TICK_FORMAT,
                "tickangle": 45,
                "tickfont": axis_font,
            },
            "yaxis": {
                "title": { "text": labels.y, "font": axis_font },
                "tickmode": "array",
                "tickvals": (0..rows).collect::<Vec<_>>(),
                "ticktext": ticktext,
                "tickfont": axis_font,
                "range": [-0.5, rows as f64 - 0.5],
            },
            "shapes": shapes,
        }
    })
}

/// Self-contained HTML page rendering `figure` with Plotly from its CDN.
pub fn standalone_html(figure: &JsonValue, title: &str) -> String {
    // Keep "</script>" inside string values from closing the script block.
    let payload = figure.to_string().replace("</", "<\\/");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{cdn}"></script>
<style>body {{ margin: 0; background: #000; }}</style>
</head>
<body>
<div id="timeline"></div>
<script>
const figure = {payload};
Plotly.newPlot("timeline", figure.data, figure.layout, {{ responsive: true }});
</script>
</body>
</html>
"#,
        title = escape_html(title),
        cdn = PLOTLY_CDN,
        payload = payload,
    )
}

fn line_shape(
    x0: NaiveDateTime,
    y0: f64,
    x1: NaiveDateTime,
    y1: f64,
    color: &str,
    dash: &str,
) -> JsonValue {
    json!({
        "type": "line",
        "x0": plotly_time(x0),
        "x1": plotly_time(x1),
        "y0": y0,
        "y1": y1,
        "line": { "color": color, "width": 1, "dash": dash },
    })
}

fn plotly_time(at: NaiveDateTime) -> String {
    at.format(PLOTLY_TIME_FORMAT).to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
