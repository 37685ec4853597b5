// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF writer — render images and plain text onto A4 pages using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: documents are built by constructing
// `PdfPage` structs containing `Vec<Op>` operation lists, then serialised via
// `PdfDocument::save()`.

use printmeter_core::error::{PrintmeterError, Result};
use printpdf::{
    Mm, Op, ParsedFont, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, RawImage,
    RawImageData, RawImageFormat, TextItem, XObjectTransform,
};
use tracing::{debug, info, instrument};

use crate::estimate::LINES_PER_PAGE;

/// A4 width in millimetres.
pub const PAGE_WIDTH_MM: f32 = 210.0;
/// A4 height in millimetres.
pub const PAGE_HEIGHT_MM: f32 = 297.0;
/// Margin on every edge, in millimetres.
pub const MARGIN_MM: f32 = 10.0;
/// Font size for rendered plain text.
pub const TEXT_FONT_SIZE_PT: f32 = 10.0;

/// Where an image lands on the page, in points from the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePlacement {
    pub x_pt: f32,
    pub y_pt: f32,
    pub scale: f32,
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Compute the placement of a `width` × `height` pixel image inside a box of
/// `max_w_pt` × `max_h_pt` starting at `margin_pt`.
///
/// One pixel maps to one point before scaling. The scale is
/// `min(max_w / w, max_h / h)`, replaced by 1 when it is not positive, and the
/// scaled image is centred in the box.
pub fn fit_image(
    width: u32,
    height: u32,
    max_w_pt: f32,
    max_h_pt: f32,
    margin_pt: f32,
) -> Result<ImagePlacement> {
    if width == 0 || height == 0 {
        return Err(PrintmeterError::ConversionFailed(format!(
            "invalid image dimensions {width}x{height}"
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let mut scale = (max_w_pt / w).min(max_h_pt / h);
    if scale.is_nan() || scale <= 0.0 {
        scale = 1.0;
    }

    let width_pt = w * scale;
    let height_pt = h * scale;
    Ok(ImagePlacement {
        x_pt: margin_pt + (max_w_pt - width_pt) / 2.0,
        y_pt: margin_pt + (max_h_pt - height_pt) / 2.0,
        scale,
        width_pt,
        height_pt,
    })
}

/// One line of text positioned on a page (baseline, points from the bottom).
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x_pt: f32,
    pub y_pt: f32,
}

/// Split lines into pages of [`LINES_PER_PAGE`] slots.
///
/// The line height is `(page height − 2·margin) / 60`; line `i` of a page sits
/// at `margin + line_height·(i + 1)` from the top. A new page starts exactly
/// when 60 lines are used, and an empty input still yields one blank page.
pub fn layout_text_lines(lines: &[String]) -> Vec<Vec<PlacedLine>> {
    let page_h_pt = Mm(PAGE_HEIGHT_MM).into_pt().0;
    let margin_pt = Mm(MARGIN_MM).into_pt().0;
    let line_height = (page_h_pt - 2.0 * margin_pt) / LINES_PER_PAGE as f32;

    let mut pages: Vec<Vec<PlacedLine>> = lines
        .chunks(LINES_PER_PAGE)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .map(|(idx, text)| PlacedLine {
                    text: text.clone(),
                    x_pt: margin_pt,
                    y_pt: page_h_pt - (margin_pt + line_height * (idx as f32 + 1.0)),
                })
                .collect()
        })
        .collect();

    if pages.is_empty() {
        pages.push(Vec::new());
    }
    pages
}

/// Renders print artifacts onto A4 pages.
pub struct PdfWriter {
    /// Title metadata embedded in the PDF /Info dictionary.
    title: String,
}

impl PdfWriter {
    /// Create a writer for A4 output.
    pub fn a4() -> Self {
        Self {
            title: "printmeter document".into(),
        }
    }

    fn page_dimensions() -> (Mm, Mm) {
        (Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM))
    }

    // -- Image to PDF ---------------------------------------------------------

    /// Create a single-page PDF containing the given image, fitted inside the
    /// margins and centred.
    #[instrument(skip(self, image_bytes), fields(bytes_len = image_bytes.len()))]
    pub fn create_from_image(&self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let (page_w, page_h) = Self::page_dimensions();

        let dynamic_image = ::image::load_from_memory(image_bytes).map_err(|err| {
            PrintmeterError::ConversionFailed(format!("failed to decode image: {}", err))
        })?;

        let (img_width, img_height) = (dynamic_image.width(), dynamic_image.height());
        let margin_pt = Mm(MARGIN_MM).into_pt().0;
        let max_w_pt = page_w.into_pt().0 - 2.0 * margin_pt;
        let max_h_pt = page_h.into_pt().0 - 2.0 * margin_pt;
        let placement = fit_image(img_width, img_height, max_w_pt, max_h_pt, margin_pt)?;

        info!(img_width, img_height, scale = placement.scale, "Creating image PDF");

        let rgb_image = dynamic_image.to_rgb8();
        let raw = RawImage {
            pixels: RawImageData::U8(rgb_image.into_raw()),
            width: img_width as usize,
            height: img_height as usize,
            data_format: RawImageFormat::RGB8,
            tag: Vec::new(),
        };

        let mut doc = PdfDocument::new(&self.title);
        let xobject_id = doc.add_image(&raw);

        // At 72 dpi one pixel is one point, matching `fit_image`.
        let ops = vec![Op::UseXobject {
            id: xobject_id,
            transform: XObjectTransform {
                translate_x: Some(Pt(placement.x_pt)),
                translate_y: Some(Pt(placement.y_pt)),
                scale_x: Some(placement.scale),
                scale_y: Some(placement.scale),
                dpi: Some(72.0),
                rotate: None,
            },
        }];

        doc.with_pages(vec![PdfPage::new(page_w, page_h, ops)]);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        debug!(output_bytes = output.len(), "Image PDF serialised");
        Ok(output)
    }

    // -- Text to PDF ----------------------------------------------------------

    /// Render `lines` with the TrueType font in `font_bytes`, 60 lines per page.
    #[instrument(skip_all, fields(lines = lines.len(), font_bytes = font_bytes.len()))]
    pub fn create_from_text_lines(&self, lines: &[String], font_bytes: &[u8]) -> Result<Vec<u8>> {
        let (page_w, page_h) = Self::page_dimensions();

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let font = ParsedFont::from_bytes(font_bytes, 0, &mut warnings).ok_or_else(|| {
            PrintmeterError::ConversionFailed("text font could not be parsed".into())
        })?;

        let mut doc = PdfDocument::new(&self.title);
        let font_id = doc.add_font(&font);

        let pages: Vec<PdfPage> = layout_text_lines(lines)
            .into_iter()
            .map(|placed| {
                let mut ops: Vec<Op> = Vec::with_capacity(placed.len() * 5);
                for line in placed {
                    ops.push(Op::StartTextSection);
                    ops.push(Op::SetTextCursor {
                        pos: Point {
                            x: Pt(line.x_pt),
                            y: Pt(line.y_pt),
                        },
                    });
                    ops.push(Op::SetFontSize {
                        size: Pt(TEXT_FONT_SIZE_PT),
                        font: font_id.clone(),
                    });
                    ops.push(Op::WriteText {
                        items: vec![TextItem::Text(line.text)],
                        font: font_id.clone(),
                    });
                    ops.push(Op::EndTextSection);
                }
                PdfPage::new(page_w, page_h, ops)
            })
            .collect();

        info!(pages = pages.len(), "Creating text PDF");
        doc.with_pages(pages);

        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        debug!(output_bytes = output.len(), "Text PDF serialised");
        Ok(output)
    }
}
