use crate::error::{Error, Result};
use crate::stat::{statement_window, Row};
use printpdf::lopdf::{self, Object, StringFormat};
use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, OffsetDateTime, PdfDocument, PdfLayerReference, Point,
};

const PT_TO_MM: f32 = 0.3528;
/// Average Helvetica glyph advance, used to right-align numeric cells.
const GLYPH_EM: f32 = 0.556;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Letterhead {
    pub name: String,
    pub street: String,
    pub city: String,
}
impl Letterhead {
    fn lines(&self) -> impl Iterator<Item = &str> {
        [&self.name, &self.street, &self.city]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementConfig {
    pub letterhead: Letterhead,
    pub title: String,
    pub currency: String,
    pub unit: String,
}
impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            letterhead: Letterhead::default(),
            title: "Autostrom".into(),
            currency: "EUR".into(),
            unit: "kWh".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    pub row_height: f32,
}
impl Default for PageGeometry {
    /// A4 portrait, 2 cm margins.
    fn default() -> Self {
        Self {
            width: 210.0,
            height: 297.0,
            margin: 20.0,
            row_height: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub bold: bool,
    pub align: Align,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub runs: Vec<TextRun>,
    /// Horizontal rules as (y, x_from, x_to).
    pub rules: Vec<(f32, f32, f32)>,
}

/// Positioned content of a statement, independent of the PDF backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementLayout {
    pub pages: Vec<PageLayout>,
    /// Ledger rows in table order, as `(date label, emphasized)`.
    pub table: Vec<(String, bool)>,
}

pub struct PdfRenderer {
    config: StatementConfig,
    geometry: PageGeometry,
}

const COLUMN_WIDTH: f32 = 30.0;
const HEADINGS: [&str; 5] = ["Date", "Meter reading", "Consumption", "Unit price", "Amount"];

impl PdfRenderer {
    pub fn new(config: StatementConfig) -> Self {
        Self {
            config,
            geometry: PageGeometry::default(),
        }
    }

    pub fn with_geometry(mut self, geometry: PageGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn config(&self) -> &StatementConfig {
        &self.config
    }

    /// Lays out the statement for the newest row of `rows`. Only the fixed
    /// statement window is shown, older history is dropped.
    pub fn layout(&self, rows: &[Row], highlight_last: bool) -> Result<StatementLayout> {
        let window = statement_window(rows);
        let Some(newest) = window.last() else {
            return Err(Error::Render("no ledger rows to render".into()));
        };
        let g = self.geometry;
        let top = g.height - g.margin;
        let bottom = g.margin;
        let right = g.width - g.margin;
        if top - bottom < 8.0 * g.row_height {
            return Err(Error::Render(format!(
                "page of {}x{} mm leaves no room for the table",
                g.width, g.height
            )));
        }

        let mut out = StatementLayout::default();
        let mut page = PageLayout::default();
        let mut y = top;

        for line in self.config.letterhead.lines() {
            page.runs.push(run(line, right, y, 10.0, false, Align::Right));
            y -= 5.0;
        }
        y -= 3.0;
        page.runs.push(run(
            &format!("{} {}", self.config.title, newest.date_label()),
            g.margin,
            y,
            16.0,
            true,
            Align::Left,
        ));
        y -= 12.0;
        y = self.table_header(&mut page, y);

        let last = window.len() - 1;
        for (i, row) in window.iter().enumerate() {
            if y < bottom + g.row_height {
                out.pages.push(std::mem::take(&mut page));
                y = self.table_header(&mut page, top);
            }
            let bold = highlight_last && i == last;
            for (col, cell) in self.cells(row).into_iter().enumerate() {
                let (x, align) = column_anchor(g.margin, col);
                page.runs.push(run(&cell, x, y, 10.0, bold, align));
            }
            out.table.push((row.date_label(), bold));
            y -= g.row_height;
        }
        page.rules
            .push((y + g.row_height - 2.0, g.margin, g.margin + 5.0 * COLUMN_WIDTH));

        y -= 8.0;
        if y < bottom {
            out.pages.push(std::mem::take(&mut page));
            y = top;
        }
        page.runs.push(run(
            &format!(
                "On {} I am billing {:.2} {} for {} {}.",
                newest.date_label(),
                newest.amount_due,
                self.config.currency,
                newest.consumption.normalize(),
                self.config.unit,
            ),
            g.margin,
            y,
            10.0,
            false,
            Align::Left,
        ));
        out.pages.push(page);

        let footer_y = (g.margin * 0.6).max(5.0);
        for (n, page) in out.pages.iter_mut().enumerate() {
            page.runs.push(run(
                &format!("Page {}", n + 1),
                g.width / 2.0,
                footer_y,
                9.0,
                false,
                Align::Center,
            ));
        }
        Ok(out)
    }

    /// Renders the statement into PDF bytes.
    ///
    /// Document id and dates derive from the title and the newest row, so the
    /// same rows always give the same bytes.
    pub fn render(&self, rows: &[Row], highlight_last: bool) -> Result<Vec<u8>> {
        let layout = self.layout(rows, highlight_last)?;
        let g = self.geometry;
        let newest = rows
            .last()
            .ok_or_else(|| Error::Render("no ledger rows to render".into()))?;
        let doc_title = format!("{} {}", self.config.title, newest.date_label());
        let stamp = newest
            .date
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .ok_or_else(|| Error::Render(format!("no timestamp for {}", newest.date_label())))?;
        let stamp = OffsetDateTime::from_unix_timestamp(stamp)
            .map_err(|e| Error::Render(e.to_string()))?;
        let doc_id = document_id(&doc_title);

        let (doc, page1, layer1) = PdfDocument::new(&doc_title, Mm(g.width), Mm(g.height), "Layer 1");
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| Error::Render(e.to_string()))?;
        let font_bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| Error::Render(e.to_string()))?;

        for (n, page) in layout.pages.iter().enumerate() {
            let layer = if n == 0 {
                doc.get_page(page1).get_layer(layer1)
            } else {
                let (p, l) = doc.add_page(Mm(g.width), Mm(g.height), "Layer 1");
                doc.get_page(p).get_layer(l)
            };
            draw_page(&layer, page, &font, &font_bold);
        }

        let bytes = doc
            .with_document_id(doc_id.clone())
            .with_creation_date(stamp)
            .with_mod_date(stamp)
            .with_metadata_date(stamp)
            .save_to_bytes()
            .map_err(|e| Error::Render(e.to_string()))?;
        pin_trailer_id(&bytes, &doc_id)
    }

    fn table_header(&self, page: &mut PageLayout, y: f32) -> f32 {
        for (col, heading) in HEADINGS.iter().enumerate() {
            let (x, align) = column_anchor(self.geometry.margin, col);
            page.runs.push(run(heading, x, y, 10.0, true, align));
        }
        page.rules.push((
            y - 2.0,
            self.geometry.margin,
            self.geometry.margin + 5.0 * COLUMN_WIDTH,
        ));
        y - self.geometry.row_height - 1.0
    }

    fn cells(&self, row: &Row) -> [String; 5] {
        let unit = &self.config.unit;
        let cur = &self.config.currency;
        [
            row.date_label(),
            format!("{} {unit}", row.meter_reading.normalize()),
            format!("{} {unit}", row.consumption.normalize()),
            format!("{:.2} {cur}", row.unit_price),
            format!("{:.2} {cur}", row.amount_due),
        ]
    }
}

/// 32 hex digits from an FNV-1a hash of `title`.
fn document_id(title: &str) -> String {
    let hash = title.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    format!("{hash:016x}{:016x}", hash.rotate_left(32))
}

/// printpdf stamps a fresh instance id into the trailer on every save.
fn pin_trailer_id(bytes: &[u8], id: &str) -> Result<Vec<u8>> {
    let mut doc = lopdf::Document::load_mem(bytes).map_err(|e| Error::Render(e.to_string()))?;
    let id = Object::String(id.as_bytes().to_vec(), StringFormat::Literal);
    doc.trailer.set("ID", Object::Array(vec![id.clone(), id]));
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| Error::Render(e.to_string()))?;
    Ok(out)
}

fn column_anchor(margin: f32, col: usize) -> (f32, Align) {
    if col == 0 {
        (margin + 1.0, Align::Left)
    } else {
        (margin + COLUMN_WIDTH * (col as f32 + 1.0) - 1.0, Align::Right)
    }
}

fn run(text: &str, x: f32, y: f32, size: f32, bold: bool, align: Align) -> TextRun {
    TextRun {
        text: text.to_string(),
        x,
        y,
        size,
        bold,
        align,
    }
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * GLYPH_EM * PT_TO_MM
}

fn draw_page(
    layer: &PdfLayerReference,
    page: &PageLayout,
    font: &IndirectFontRef,
    font_bold: &IndirectFontRef,
) {
    for r in &page.runs {
        let x = match r.align {
            Align::Left => r.x,
            Align::Right => r.x - text_width(&r.text, r.size),
            Align::Center => r.x - text_width(&r.text, r.size) / 2.0,
        };
        let f = if r.bold { font_bold } else { font };
        layer.use_text(r.text.as_str(), r.size, Mm(x), Mm(r.y), f);
    }
    for &(y, x1, x2) in &page.rules {
        layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x1), Mm(y)), false),
                (Point::new(Mm(x2), Mm(y)), false),
            ],
            is_closed: false,
        });
    }
}
