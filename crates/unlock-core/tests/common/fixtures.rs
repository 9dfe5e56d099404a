//! PDF fixtures built with lopdf
#![allow(dead_code)]

use lopdf::{
    dictionary, Dictionary, Document, EncryptionState, EncryptionVersion, Object, Permissions,
    Stream, StringFormat,
};

/// Page size used by every fixture, in PDF points.
pub const PAGE_WIDTH: i64 = 200;
pub const PAGE_HEIGHT: i64 = 100;

/// Unencrypted document whose pages each show `text`.
pub fn plain_pdf(num_pages: u32, text: &str) -> Document {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for _ in 0..num_pages {
        let content = format!(
            "0 0 1 rg 10 10 80 40 re f BT /F1 12 Tf 20 70 Td ({}) Tj ET",
            text
        );
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => num_pages as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

pub fn save(mut doc: Document) -> Vec<u8> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Document that needs `user_password` to open (RC4, 128-bit).
pub fn encrypted_pdf(num_pages: u32, user_password: &str) -> Vec<u8> {
    let mut doc = plain_pdf(num_pages, "Quarterly statement");

    // The file identifier feeds the key derivation.
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(vec![7u8; 16], StringFormat::Literal),
            Object::String(vec![9u8; 16], StringFormat::Literal),
        ]),
    );

    let version = EncryptionVersion::V2 {
        document: &doc,
        owner_password: "owner-only",
        user_password,
        key_length: 128,
        permissions: Permissions::all(),
    };
    let state = EncryptionState::try_from(version).unwrap();
    doc.encrypt(&state).unwrap();
    save(doc)
}
