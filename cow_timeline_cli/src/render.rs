use std::panic;
use std::path::Path;

use anyhow::Result;
use chrono::Duration;
use cow_timeline::figure::TICK_FORMAT;
use cow_timeline::{viridis, BehaviorSet, FigureOptions, Rgb, Timeline};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, FontFamily, FontStyle, FontTransform};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend,
    DrawingErrorKind,
};

const CHART_WIDTH: u32 = 1600;
const BAR_HALF_HEIGHT: f64 = 0.4;
const DOT_SEGMENTS: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

/// Render one timeline; backend panics are reported as errors.
pub fn render_chart_guard(
    timeline: &Timeline,
    behaviors: &BehaviorSet,
    opts: &FigureOptions,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(timeline, behaviors, opts, path, kind)
            .map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(
    timeline: &Timeline,
    behaviors: &BehaviorSet,
    opts: &FigureOptions,
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    let size = (CHART_WIDTH, opts.theme.height.max(200));
    match kind {
        ChartKind::Png => {
            let root = FontSafeBackend::new(BitMapBackend::new(path, size)).into_drawing_area();
            draw_timeline(root, timeline, behaviors, opts)
        }
        ChartKind::Svg => {
            let root = FontSafeBackend::new(SVGBackend::new(path, size)).into_drawing_area();
            draw_timeline(root, timeline, behaviors, opts)
        }
    }
}

fn color(rgb: Rgb) -> RGBColor {
    RGBColor(rgb.0, rgb.1, rgb.2)
}

fn draw_timeline<DB>(
    area: DrawingArea<DB, plotters::coord::Shift>,
    timeline: &Timeline,
    behaviors: &BehaviorSet,
    opts: &FigureOptions,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let Some((start, end)) = timeline.span() else {
        return Ok(());
    };
    let theme = &opts.theme;
    let background = color(theme.background);
    let foreground = color(theme.foreground);
    let labels = opts.labels(timeline);
    let rows = timeline.axis.len();
    let top = rows as f64 - 0.5;
    let span_s = ((end - start).num_milliseconds() as f64 / 1000.0).max(1.0);
    let offset = |at: chrono::NaiveDateTime| (at - start).num_milliseconds() as f64 / 1000.0;

    area.fill(&background)?;
    let font_size = theme.font_size as f64;
    let (ml, mr, mt, mb) = theme.margin;
    let title_font = FontDesc::new(FontFamily::SansSerif, font_size * 1.6, FontStyle::Normal);
    let axis_font = FontDesc::new(FontFamily::SansSerif, font_size, FontStyle::Normal);
    let desc_font = FontDesc::new(FontFamily::SansSerif, font_size * 1.2, FontStyle::Normal);

    let mut chart = ChartBuilder::on(&area)
        .caption(&labels.title, title_font.color(&foreground))
        .margin_left(ml)
        .margin_right(mr)
        .margin_top(mt)
        .margin_bottom(mb / 4)
        .set_label_area_size(LabelAreaPosition::Left, 160)
        .set_label_area_size(LabelAreaPosition::Bottom, mb + 60)
        .build_cartesian_2d(0.0..span_s, -0.5..top)?;

    let tick_formatter = |secs: &f64| {
        let at = start + Duration::milliseconds((*secs * 1000.0).round() as i64);
        at.format(TICK_FORMAT).to_string()
    };
    chart
        .configure_mesh()
        .light_line_style(&TRANSPARENT)
        .bold_line_style(&TRANSPARENT)
        .axis_style(&foreground)
        .disable_y_mesh()
        .x_labels(10)
        .x_label_formatter(&tick_formatter)
        .x_label_style(
            axis_font
                .clone()
                .transform(FontTransform::Rotate90)
                .color(&foreground),
        )
        .y_labels(0)
        .x_desc(labels.x.as_str())
        .y_desc(labels.y.as_str())
        .axis_desc_style(desc_font.color(&foreground))
        .draw()?;

    chart.draw_series(timeline.entries.iter().filter_map(|entry| {
        let row = timeline.axis_position(entry.behavior)? as f64;
        let fill = color(viridis(entry.behavior, behaviors.len()));
        Some(Rectangle::new(
            [
                (offset(entry.start), row - BAR_HALF_HEIGHT),
                (offset(entry.end), row + BAR_HALF_HEIGHT),
            ],
            fill.filled(),
        ))
    }))?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![
            (0.0, -0.5),
            (span_s, -0.5),
            (span_s, top),
            (0.0, top),
            (0.0, -0.5),
        ],
        &foreground,
    )))?;

    if opts.day_lines {
        for &midnight in &timeline.day_boundaries {
            let x = offset(midnight);
            chart.draw_series(dotted_segments(-0.5, top).map(|(y0, y1)| {
                PathElement::new(vec![(x, y0), (x, y1)], &foreground)
            }))?;
        }
    }

    // Row names, right-aligned against the y axis.
    let row_labels: Vec<(BackendCoord, &str)> = timeline
        .axis
        .iter()
        .enumerate()
        .map(|(pos, &behavior)| {
            let (x, y) = chart.backend_coord(&(0.0, pos as f64));
            ((x - 8, y), behaviors.display(behavior, opts.language))
        })
        .collect();
    let row_style = axis_font
        .color(&foreground)
        .pos(Pos::new(HPos::Right, VPos::Center));
    for (coord, text) in row_labels {
        area.draw(&Text::new(text.to_string(), coord, row_style.clone()))?;
    }

    area.present()?;
    Ok(())
}

/// Alternating on-segments of a dotted vertical line from `y0` to `y1`.
fn dotted_segments(y0: f64, y1: f64) -> impl Iterator<Item = (f64, f64)> {
    let step = (y1 - y0) / DOT_SEGMENTS as f64;
    (0..DOT_SEGMENTS)
        .step_by(2)
        .map(move |i| (y0 + step * i as f64, y0 + step * (i + 1) as f64))
}

/// Backend wrapper that survives hosts without usable fonts: when the inner
/// backend fails or panics on text, the label is drawn as one outline box per
/// character instead.
struct FontSafeBackend<DB> {
    inner: DB,
}

impl<DB> FontSafeBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

impl<DB: DrawingBackend> DrawingBackend for FontSafeBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(DrawingErrorKind::FontError(_))) | Err(_) => {
                self.draw_text_fallback(text, style, pos)
            }
            Ok(Err(err)) => Err(err),
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.estimate_text_size(text, style)
        })) {
            Ok(Ok(size)) => Ok(size),
            _ => Ok(fallback_text_size(text, style.size())),
        }
    }
}

impl<DB: DrawingBackend> FontSafeBackend<DB> {
    fn draw_text_fallback<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        let color = style.color();
        if color.alpha == 0.0 || text.trim().is_empty() {
            return Ok(());
        }

        let (width, height) = fallback_text_size(text, style.size());
        let (width, height) = (width as i32, height as i32);
        let dx = match style.anchor().h_pos {
            HPos::Left => 0,
            HPos::Right => -width,
            HPos::Center => -width / 2,
        };
        let dy = match style.anchor().v_pos {
            VPos::Top => 0,
            VPos::Center => -(height / 2),
            VPos::Bottom => -height,
        };

        let advance = (style.size() * FALLBACK_ADVANCE).round().max(2.0) as i32;
        let box_w = (advance - 2).max(1);
        let mut x = pos.0 + dx;
        let y = pos.1 + dy;
        for ch in text.chars() {
            if !ch.is_whitespace() {
                self.draw_outline_box(x, y + 1, box_w, (height - 2).max(1), color)?;
            }
            x += advance;
        }
        Ok(())
    }

    fn draw_outline_box(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        for dx in 0..=w {
            self.inner.draw_pixel((x + dx, y), color.clone())?;
            self.inner.draw_pixel((x + dx, y + h), color.clone())?;
        }
        for dy in 0..=h {
            self.inner.draw_pixel((x, y + dy), color.clone())?;
            self.inner.draw_pixel((x + w, y + dy), color.clone())?;
        }
        Ok(())
    }
}

const FALLBACK_ADVANCE: f64 = 0.6;

fn fallback_text_size(text: &str, size: f64) -> (u32, u32) {
    let advance = (size * FALLBACK_ADVANCE).round().max(2.0) as u32;
    let chars = text.chars().count() as u32;
    (advance * chars, size.round().max(2.0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cow_timeline::{build_timeline, parse_table, Language, ParseOptions, Profile, TimelineParams};

    fn timeline() -> Timeline {
        let csv = "date,time,cow-a\n\
                   01-03-2024,22.00.00,ยืน\n\
                   02-03-2024,01.00.00,นอน\n\
                   02-03-2024,03.00.00,กิน\n\
                   02-03-2024,04.00.00,ยืน\n";
        let table = parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap();
        build_timeline(&table, 2, &Profile::default(), &TimelineParams::default()).unwrap()
    }

    #[test]
    fn test_dotted_segments_alternate() {
        let segments: Vec<_> = dotted_segments(0.0, 8.0).collect();
        assert_eq!(segments.len(), DOT_SEGMENTS / 2);
        assert_eq!(segments[0].0, 0.0);
        assert!(segments[1].0 > segments[0].1);
        assert!(segments.last().unwrap().1 <= 8.0 + 1e-9);
    }

    #[test]
    fn test_fallback_text_size_scales_with_chars() {
        assert_eq!(fallback_text_size("abc", 10.0), (18, 10));
        assert_eq!(fallback_text_size("", 10.0), (0, 10));
    }

    #[test]
    fn test_svg_render_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cow.svg");
        let opts = FigureOptions {
            language: Language::English,
            day_lines: true,
            ..FigureOptions::default()
        };
        let behaviors = Profile::default().behaviors;
        render_chart_guard(&timeline(), &behaviors, &opts, &path, ChartKind::Svg).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("<rect"));
    }
}
