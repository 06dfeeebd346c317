//! PDF extraction: text layer per page, OCR for pages without one.

use super::Extraction;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::ocr::OcrFallback;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::xobject::PdfImage;
use lopdf::{Dictionary, Document};
use std::borrow::Cow;
use std::io::Cursor;

/// Streams that already hold an image file tesseract can read.
const ENCODED_IMAGE_FILTERS: &[&str] = &["DCTDecode", "JPXDecode"];

/// Filters lopdf can undo to reach raw samples.
const SAMPLE_FILTERS: &[&str] = &["FlateDecode", "LZWDecode", "ASCII85Decode"];

pub(super) fn extract_pdf(name: &str, bytes: &[u8], ocr: &OcrFallback) -> KnowledgeResult<Extraction> {
    let document = Document::load_mem(bytes)
        .map_err(|e| KnowledgeError::Extraction(format!("Failed to parse PDF '{}': {}", name, e)))?;
    let pages = document.get_pages();

    let page_texts = read_text_layer(name, bytes).unwrap_or_default();

    let mut extraction = Extraction {
        pages: Some(pages.len()),
        ..Default::default()
    };

    for (index, (page_number, page_id)) in pages.iter().enumerate() {
        let text = page_texts.get(index).map(|t| t.trim()).unwrap_or_default();
        if !text.is_empty() {
            extraction.push_block(text);
            continue;
        }

        let images = match document.get_page_images(*page_id) {
            Ok(images) => images,
            Err(e) => {
                tracing::debug!(document = name, page = page_number, "No readable images: {}", e);
                continue;
            }
        };

        for (i, xobject) in images.iter().enumerate() {
            let label = format!("{} page {} image {}", name, page_number, i + 1);
            if !ocr.is_enabled() {
                extraction.images_found += 1;
                continue;
            }
            match ocr_input(&document, xobject) {
                Ok(bytes) => extraction.recognize_image(ocr, &bytes, &label),
                Err(reason) => extraction.skip_image(&label, &reason),
            }
        }
    }

    Ok(extraction)
}

/// Image file bytes for an XObject: JPEG and JPEG 2000 pass through, raw
/// samples are decompressed and re-encoded as PNG. `Err` names why the
/// image cannot be read.
fn ocr_input<'a>(document: &Document, xobject: &PdfImage<'a>) -> Result<Cow<'a, [u8]>, String> {
    let filters: &[String] = xobject.filters.as_deref().unwrap_or_default();

    if let [filter] = filters {
        if ENCODED_IMAGE_FILTERS.contains(&filter.as_str()) {
            return Ok(Cow::Borrowed(xobject.content));
        }
    }
    if !filters.iter().all(|f| SAMPLE_FILTERS.contains(&f.as_str())) {
        return Err(format!("unsupported image filter {}", filters.join("+")));
    }

    let samples = if filters.is_empty() {
        xobject.content.to_vec()
    } else {
        document
            .get_object(xobject.id)
            .and_then(|object| object.as_stream())
            .and_then(|stream| stream.decompressed_content())
            .map_err(|e| format!("cannot decompress image stream: {}", e))?
    };

    encode_png(document, xobject, samples).map(Cow::Owned)
}

fn encode_png(document: &Document, xobject: &PdfImage<'_>, samples: Vec<u8>) -> Result<Vec<u8>, String> {
    let width = u32::try_from(xobject.width).map_err(|_| format!("invalid width {}", xobject.width))?;
    let height =
        u32::try_from(xobject.height).map_err(|_| format!("invalid height {}", xobject.height))?;
    let channels = color_channels(document, xobject)?;
    let bits = xobject.bits_per_component.unwrap_or(8);

    let decoded = match (channels, bits) {
        (1, 8) => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        (1, 1) => GrayImage::from_raw(width, height, expand_bilevel(&samples, width, height))
            .map(DynamicImage::ImageLuma8),
        (3, 8) => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        _ => {
            return Err(format!(
                "unsupported pixel layout: {} channel(s) at {} bits",
                channels, bits
            ))
        }
    }
    .ok_or_else(|| format!("image data is too short for {}x{}", width, height))?;

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;
    Ok(png)
}

fn color_channels(document: &Document, xobject: &PdfImage<'_>) -> Result<usize, String> {
    match xobject.color_space.as_deref() {
        // Image masks carry no color space; they are one-bit stencils
        None | Some("DeviceGray") | Some("CalGray") => Ok(1),
        Some("DeviceRGB") | Some("CalRGB") => Ok(3),
        Some("ICCBased") => icc_components(document, xobject.origin_dict)
            .ok_or_else(|| "ICCBased color space without /N".to_string()),
        Some(other) => Err(format!("unsupported color space {}", other)),
    }
}

/// Component count of an `[/ICCBased <stream>]` color space.
fn icc_components(document: &Document, dict: &Dictionary) -> Option<usize> {
    let profile = dict.get(b"ColorSpace").ok()?.as_array().ok()?.get(1)?;
    let stream = document
        .get_object(profile.as_reference().ok()?)
        .ok()?
        .as_stream()
        .ok()?;
    let components = stream.dict.get(b"N").ok()?.as_i64().ok()?;
    usize::try_from(components).ok()
}

/// Unpack 1-bit rows (padded to whole bytes) into 8-bit gray, 1 = white.
fn expand_bilevel(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let row_bytes = width.div_ceil(8);
    let mut pixels = Vec::with_capacity(width * height as usize);
    for row in packed.chunks(row_bytes).take(height as usize) {
        for x in 0..width {
            let bit = row.get(x / 8).map_or(0, |byte| (byte >> (7 - x % 8)) & 1);
            pixels.push(if bit == 1 { 255 } else { 0 });
        }
    }
    pixels
}

/// Per-page text, or `None` when the text layer cannot be read at all.
fn read_text_layer(name: &str, bytes: &[u8]) -> Option<Vec<String>> {
    // pdf-extract panics on some malformed font programs
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Some(pages),
        Ok(Err(e)) => {
            tracing::warn!(document = name, "Unreadable text layer, trying OCR on every page: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!(document = name, "Text layer parser panicked, trying OCR on every page");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::ScriptedEngine;
    use crate::ocr::OCR_MARKER;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::sync::Arc;

    const FAKE_SCAN: &[u8] = b"fake-jpeg-bytes";

    fn jpeg_scan() -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            FAKE_SCAN.to_vec(),
        )
    }

    /// Raw samples, Flate-compressed the way scanners usually store them.
    fn flate_scan(samples: Vec<u8>, width: i64, height: i64, color_space: &str, bits: i64) -> Stream {
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => bits,
            },
            samples,
        );
        stream.compress().unwrap();
        assert!(stream.dict.get(b"Filter").is_ok());
        stream
    }

    fn build_pdf(text_page: Option<&str>, scan: Option<Stream>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let mut kids = Vec::new();

        if let Some(text) = text_page {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            });
            kids.push(page_id.into());
        }

        if let Some(scan) = scan {
            let image_id = doc.add_object(scan);
            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![500.into(), 0.into(), 0.into(), 700.into(), 0.into(), 0.into()],
                    ),
                    Operation::new("Do", vec!["Im1".into()]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_invalid_pdf_is_extraction_error() {
        let err = extract_pdf("broken.pdf", b"not a pdf", &OcrFallback::disabled()).unwrap_err();
        assert!(matches!(err, KnowledgeError::Extraction(_)));
    }

    #[test]
    fn test_scanned_page_goes_through_ocr() {
        let bytes = build_pdf(None, Some(jpeg_scan()));
        let engine = Arc::new(ScriptedEngine::new().always(FAKE_SCAN, "Purchase order 5521"));
        let ocr = OcrFallback::new(engine, 3);

        let extraction = extract_pdf("scan.pdf", &bytes, &ocr).unwrap();
        assert_eq!(extraction.pages, Some(1));
        assert_eq!(extraction.images_found, 1);
        assert_eq!(extraction.images_recognized, 1);
        assert_eq!(
            extraction.text,
            format!("{}Purchase order 5521", OCR_MARKER)
        );
    }

    #[test]
    fn test_scanned_page_without_ocr_counts_image() {
        let bytes = build_pdf(None, Some(jpeg_scan()));
        let extraction = extract_pdf("scan.pdf", &bytes, &OcrFallback::disabled()).unwrap();
        assert_eq!(extraction.images_found, 1);
        assert_eq!(extraction.images_recognized, 0);
        assert!(extraction.text.is_empty());
    }

    #[test]
    fn test_text_page_is_read_directly() {
        let bytes = build_pdf(Some("Hello World"), None);
        let engine = Arc::new(ScriptedEngine::new());
        let ocr = OcrFallback::new(engine.clone(), 3);

        let extraction = extract_pdf("hello.pdf", &bytes, &ocr).unwrap();
        assert!(extraction.text.contains("Hello"));
        assert_eq!(extraction.images_found, 0);
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_flate_image_is_reencoded_as_png() {
        // Dark stripe every fourth row on a white page
        let pixels: Vec<u8> = (0..16 * 16)
            .map(|i| if (i / 16) % 4 == 0 { 0 } else { 255 })
            .collect();
        let bytes = build_pdf(None, Some(flate_scan(pixels.clone(), 16, 16, "DeviceGray", 8)));
        let engine = Arc::new(ScriptedEngine::new().otherwise("Delivery note 88"));
        let ocr = OcrFallback::new(engine.clone(), 3);

        let extraction = extract_pdf("flate.pdf", &bytes, &ocr).unwrap();
        assert_eq!(extraction.images_recognized, 1);
        assert!(extraction.text.ends_with("Delivery note 88"));

        let seen = engine.images.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(b"\x89PNG\r\n\x1a\n"));
        let decoded = image::load_from_memory(&seen[0]).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (16, 16));
        assert_eq!(decoded.into_raw(), pixels);
    }

    #[test]
    fn test_rgb_scan_is_reencoded() {
        let rgb = [200u8, 10, 10].repeat(8 * 8);
        let bytes = build_pdf(None, Some(flate_scan(rgb, 8, 8, "DeviceRGB", 8)));
        let engine = Arc::new(ScriptedEngine::new());
        let ocr = OcrFallback::new(engine.clone(), 3);

        extract_pdf("rgb.pdf", &bytes, &ocr).unwrap();
        let seen = engine.images.lock().unwrap();
        assert!(!seen.is_empty());
        let decoded = image::load_from_memory(&seen[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }

    #[test]
    fn test_unsupported_filter_skips_engine() {
        let fax = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "BitsPerComponent" => 1,
                "Filter" => "CCITTFaxDecode",
            },
            vec![0u8; 16],
        );
        let bytes = build_pdf(None, Some(fax));
        let engine = Arc::new(ScriptedEngine::new().otherwise("never used"));
        let ocr = OcrFallback::new(engine.clone(), 3);

        let extraction = extract_pdf("fax.pdf", &bytes, &ocr).unwrap();
        assert_eq!(extraction.images_found, 1);
        assert_eq!(extraction.images_recognized, 0);
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_expand_bilevel_pads_rows() {
        // 10 pixels wide needs two bytes per row
        let packed = [0b1010_1010, 0b1100_0000, 0b0000_0000, 0b0100_0000];
        let pixels = expand_bilevel(&packed, 10, 2);
        assert_eq!(
            pixels,
            vec![
                255, 0, 255, 0, 255, 0, 255, 0, 255, 255, //
                0, 0, 0, 0, 0, 0, 0, 0, 0, 255,
            ]
        );
    }
}
