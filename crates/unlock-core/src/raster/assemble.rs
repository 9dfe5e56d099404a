//! Output document assembly
//!
//! Every page of the rebuilt PDF is a single image XObject drawn over the
//! full MediaBox. Rasters are PNG-encoded and the PNG's IDAT stream is
//! embedded as-is: PDF's FlateDecode with PNG predictors (`/Predictor 15`)
//! reads that data directly, so the embedded image stays the lossless PNG
//! encoding without a second compression pass.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::PageRaster;
use crate::error::UnlockError;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const IMAGE_NAME: &[u8] = b"Im0";

/// Builds a new, unencrypted PDF one image page at a time.
pub struct PdfAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfAssembler {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Append a page sized to `raster`, with the raster drawn at (0,0)
    /// covering the whole page.
    pub fn add_page(&mut self, raster: &PageRaster) -> Result<(), UnlockError> {
        let width = raster.width() as i64;
        let height = raster.height() as i64;

        let png = encode_png(raster)?;
        let image_data = idat_stream(&png)?;

        let decode_parms = Dictionary::from_iter(vec![
            ("Predictor", Object::Integer(15)),
            ("Colors", Object::Integer(3)),
            ("BitsPerComponent", Object::Integer(8)),
            ("Columns", Object::Integer(width)),
        ]);
        let image_dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(width)),
            ("Height", Object::Integer(height)),
            ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
            ("Filter", Object::Name(b"FlateDecode".to_vec())),
            ("DecodeParms", Object::Dictionary(decode_parms)),
        ]);
        let image_id = self
            .doc
            .add_object(Stream::new(image_dict, image_data).with_compression(false));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_NAME.to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content
            .encode()
            .map_err(|e| UnlockError::Render(format!("Failed to encode page content: {}", e)))?;
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content_bytes));

        let xobjects = Dictionary::from_iter(vec![("Im0", Object::Reference(image_id))]);
        let resources = Dictionary::from_iter(vec![("XObject", Object::Dictionary(xobjects))]);
        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(self.pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(width),
                    Object::Integer(height),
                ]),
            ),
            ("Resources", Object::Dictionary(resources)),
            ("Contents", Object::Reference(content_id)),
        ]);
        let page_id = self.doc.add_object(page);
        self.kids.push(Object::Reference(page_id));

        Ok(())
    }

    /// Write the page tree and catalog, then serialize.
    pub fn finish(mut self) -> Result<Vec<u8>, UnlockError> {
        let count = self.kids.len() as i64;
        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(count)),
            ("Kids", Object::Array(self.kids)),
        ]);
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(self.pages_id)),
        ]));
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        self.doc.compress();

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| UnlockError::Internal(format!("Failed to save rebuilt PDF: {}", e)))?;
        Ok(buffer)
    }
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Losslessly encode an RGB raster as a non-interlaced 8-bit PNG.
fn encode_png(raster: &PageRaster) -> Result<Vec<u8>, UnlockError> {
    let mut png_bytes = Vec::new();
    let mut encoder = png::Encoder::new(&mut png_bytes, raster.width(), raster.height());
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|e| UnlockError::Render(format!("PNG encode failed: {}", e)))?;
    writer
        .write_image_data(raster.pixels())
        .map_err(|e| UnlockError::Render(format!("PNG encode failed: {}", e)))?;
    writer
        .finish()
        .map_err(|e| UnlockError::Render(format!("PNG encode failed: {}", e)))?;

    Ok(png_bytes)
}

/// Concatenate the IDAT chunks of a PNG file into one zlib stream.
fn idat_stream(png_bytes: &[u8]) -> Result<Vec<u8>, UnlockError> {
    let malformed = |what: &str| UnlockError::Render(format!("Malformed PNG: {}", what));

    if !png_bytes.starts_with(PNG_SIGNATURE) {
        return Err(malformed("missing signature"));
    }

    let mut data = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= png_bytes.len() {
        let len = u32::from_be_bytes([
            png_bytes[pos],
            png_bytes[pos + 1],
            png_bytes[pos + 2],
            png_bytes[pos + 3],
        ]) as usize;
        let kind = &png_bytes[pos + 4..pos + 8];
        let start = pos + 8;
        let end = start + len;
        // Chunk data is followed by a 4-byte CRC.
        if end + 4 > png_bytes.len() {
            return Err(malformed("truncated chunk"));
        }

        match kind {
            b"IDAT" => data.extend_from_slice(&png_bytes[start..end]),
            b"IEND" => break,
            _ => {}
        }
        pos = end + 4;
    }

    if data.is_empty() {
        return Err(malformed("no image data"));
    }
    Ok(data)
}
