//! lopdf plumbing shared by both render paths: reading page boxes and
//! resources, wrapping page content, and concatenating single-page files.

use crate::error::BatchmarkError;
use crate::types::PageGeometry;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream, dictionary};
use std::path::Path;

const DEFAULT_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
const MAX_INHERIT_DEPTH: usize = 32;

pub fn load_source(path: &Path) -> Result<LoDocument, BatchmarkError> {
    let doc = LoDocument::load(path)?;
    if doc.is_encrypted() {
        return Err(BatchmarkError::Pdf(format!(
            "{} is encrypted",
            path.display()
        )));
    }
    if doc.get_pages().is_empty() {
        return Err(BatchmarkError::Pdf(format!("{} has no pages", path.display())));
    }
    Ok(doc)
}

/// Looks `key` up on the page and then on its `/Parent` chain.
fn inherited<'a>(doc: &'a LoDocument, page: &'a lopdf::Dictionary, key: &[u8]) -> Option<&'a LoObject> {
    let mut current = page;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent_id = current.get(b"Parent").and_then(LoObject::as_reference).ok()?;
        current = doc.get_object(parent_id).and_then(LoObject::as_dict).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// CropBox, falling back to MediaBox, as `[x0, y0, x1, y1]`.
pub fn page_box(doc: &LoDocument, page_id: LoObjectId) -> Result<[f32; 4], BatchmarkError> {
    let page = doc.get_object(page_id).and_then(LoObject::as_dict)?;
    for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
        let Some(obj) = inherited(doc, page, key) else {
            continue;
        };
        let Ok(arr) = resolve(doc, obj).as_array() else {
            continue;
        };
        if arr.len() != 4 {
            continue;
        }
        let mut out = [0.0f32; 4];
        let mut ok = true;
        for (slot, value) in out.iter_mut().zip(arr.iter()) {
            match resolve(doc, value).as_float() {
                Ok(v) => *slot = v,
                Err(_) => ok = false,
            }
        }
        if ok {
            let [x0, y0, x1, y1] = out;
            return Ok([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]);
        }
    }
    Ok(DEFAULT_BOX)
}

pub fn page_geometry(doc: &LoDocument, page_id: LoObjectId) -> Result<PageGeometry, BatchmarkError> {
    let [x0, y0, x1, y1] = page_box(doc, page_id)?;
    Ok(PageGeometry::new(x1 - x0, y1 - y0))
}

pub fn page_resources_dict(doc: &LoDocument, page_id: LoObjectId) -> Result<lopdf::Dictionary, BatchmarkError> {
    let page = doc.get_object(page_id).and_then(LoObject::as_dict)?;
    Ok(match inherited(doc, page, b"Resources").map(|obj| resolve(doc, obj)) {
        Some(LoObject::Dictionary(d)) => d.clone(),
        _ => lopdf::Dictionary::new(),
    })
}

/// Returns the sub-dictionary `key` of `resources`, resolving references.
pub fn resource_subdict(doc: &LoDocument, resources: &lopdf::Dictionary, key: &[u8]) -> lopdf::Dictionary {
    match resources.get(key).map(|obj| resolve(doc, obj)) {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        _ => lopdf::Dictionary::new(),
    }
}

/// Brackets the page's existing content streams between `prefix` and
/// `suffix`. The original streams are referenced, not rewritten.
pub fn wrap_page_contents(
    doc: &mut LoDocument,
    page_id: LoObjectId,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
) -> Result<(), BatchmarkError> {
    let existing: Vec<LoObject> = {
        let page = doc.get_object(page_id).and_then(LoObject::as_dict)?;
        match page.get(b"Contents") {
            Ok(LoObject::Reference(id)) => match doc.get_object(*id) {
                Ok(LoObject::Array(items)) => items.clone(),
                _ => vec![LoObject::Reference(*id)],
            },
            Ok(LoObject::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };
    let prefix_id = doc.add_object(LoStream::new(dictionary! {}, prefix));
    let suffix_id = doc.add_object(LoStream::new(dictionary! {}, suffix));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(LoObject::Reference(prefix_id));
    contents.extend(existing);
    contents.push(LoObject::Reference(suffix_id));

    let page = doc.get_object_mut(page_id).and_then(LoObject::as_dict_mut)?;
    page.set("Contents", LoObject::Array(contents));
    Ok(())
}

/// Builds a one-page PDF showing a JPEG scaled to `geometry` points.
pub fn single_image_page_pdf(
    jpeg: Vec<u8>,
    pixel_width: u32,
    pixel_height: u32,
    geometry: PageGeometry,
) -> LoDocument {
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => pixel_width as i64,
            "Height" => pixel_height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));
    let content = format!(
        "q {:.4} 0 0 {:.4} 0 0 cm /Im1 Do Q\n",
        geometry.width, geometry.height
    )
    .into_bytes();
    let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        },
        "MediaBox" => vec![0.into(), 0.into(), geometry.width.into(), geometry.height.into()],
    });
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

fn import_document_objects(dst: &mut LoDocument, mut src: LoDocument) -> Result<Vec<LoObjectId>, BatchmarkError> {
    if src.is_encrypted() {
        return Err(BatchmarkError::Pdf("page PDF is encrypted".to_string()));
    }
    let start_id = dst.max_id + 1;
    src.renumber_objects_with(start_id);
    let page_ids: Vec<LoObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    Ok(page_ids)
}

/// Concatenates the pages of `parts`, in order, under one new page tree.
pub fn concatenate(parts: Vec<LoDocument>) -> Result<LoDocument, BatchmarkError> {
    let mut out = LoDocument::with_version("1.5");
    let pages_id = out.new_object_id();
    let mut kids: Vec<LoObject> = Vec::new();

    for part in parts {
        for page_id in import_document_objects(&mut out, part)? {
            let page = out.get_object_mut(page_id).and_then(LoObject::as_dict_mut)?;
            page.set("Parent", LoObject::Reference(pages_id));
            kids.push(LoObject::Reference(page_id));
        }
    }
    if kids.is_empty() {
        return Err(BatchmarkError::Pdf("no pages to concatenate".to_string()));
    }

    // The imported catalogs and page trees are unreachable from the new root
    // and are dropped by the prune below.
    let count = kids.len() as i64;
    out.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);
    out.prune_objects();
    out.renumber_objects();
    Ok(out)
}

pub fn save(doc: &mut LoDocument, path: &Path) -> Result<(), BatchmarkError> {
    doc.compress();
    doc.save(path)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A Helvetica text page per entry in `texts`, sized `width x height`.
    pub fn text_pdf(texts: &[&str], width: i64, height: i64) -> LoDocument {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids: Vec<LoObject> = Vec::new();
        for text in texts {
            let content = format!("BT /F1 18 Tf 72 720 Td ({text}) Tj ET").into_bytes();
            let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    pub fn write_text_pdf(path: &Path, texts: &[&str]) {
        let mut doc = text_pdf(texts, 612, 792);
        doc.save(path).expect("save fixture pdf");
    }
}
