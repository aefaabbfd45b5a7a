use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document as PdfFile, Object, Stream, StringFormat};
use serde_json::json;

/// Build a minimal text-layer PDF with one content stream per page, one
/// text-showing operation per line.
pub fn fixture_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = PdfFile::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for text in pages {
        let mut operations = Vec::new();
        let mut cursor = 720i64;
        for line in text.lines() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ));
            operations.push(Operation::new(
                "Td",
                vec![Object::Integer(72), Object::Integer(cursor)],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(
                    line.as_bytes().to_vec(),
                    StringFormat::Literal,
                )],
            ));
            operations.push(Operation::new("ET", vec![]));
            cursor -= 14;
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
            "Contents" => Object::Reference(content_id),
        });
        kids.push(page_id);
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<Object>>(),
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// A well-formed judgment reply for the scripted LLM.
pub fn judgment(state: &str, confidence: i64, quotes: &[&str]) -> String {
    let quotes = quotes
        .iter()
        .map(|text| json!({"text": text, "page_start": 1, "page_end": 1}))
        .collect::<Vec<serde_json::Value>>();

    json!({
        "compliance_state": state,
        "confidence": confidence,
        "relevant_quotes": quotes,
        "rationale": "scripted rationale",
    })
    .to_string()
}
