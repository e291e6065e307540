//! Page list kept in the workspace root doc under `meta.pages`.

use serde::{Deserialize, Serialize};
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, Transact, TransactionMut,
    WriteTxn,
};

use crate::store::{get_f64, get_str, get_string_list, META};

const PAGES: &str = "pages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub id: String,
    pub title: String,
    pub create_date: Option<i64>,
    pub updated_date: Option<i64>,
    pub tags: Vec<String>,
}

fn pages_array(txn: &mut TransactionMut) -> ArrayRef {
    let meta = txn.get_or_insert_map(META);
    match meta.get(&*txn, PAGES) {
        Some(Out::YArray(array)) => array,
        _ => meta.insert(txn, PAGES, ArrayPrelim::default()),
    }
}

fn page_maps(txn: &TransactionMut, pages: &ArrayRef) -> Vec<MapRef> {
    pages
        .iter(txn)
        .filter_map(|value| match value {
            Out::YMap(map) => Some(map),
            _ => None,
        })
        .collect()
}

fn find_page(txn: &TransactionMut, pages: &ArrayRef, id: &str) -> Option<(u32, MapRef)> {
    page_maps(txn, pages)
        .into_iter()
        .enumerate()
        .find(|(_, map)| get_str(txn, map, "id").as_deref() == Some(id))
        .map(|(i, map)| (i as u32, map))
}

pub fn list_pages(doc: &Doc) -> Vec<PageMeta> {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META);
    let Some(Out::YArray(pages)) = meta.get(&txn, PAGES) else {
        return Vec::new();
    };
    page_maps(&txn, &pages)
        .iter()
        .filter_map(|map| {
            Some(PageMeta {
                id: get_str(&txn, map, "id")?,
                title: get_str(&txn, map, "title").unwrap_or_default(),
                create_date: get_f64(&txn, map, "createDate").map(|n| n as i64),
                updated_date: get_f64(&txn, map, "updatedDate").map(|n| n as i64),
                tags: get_string_list(&txn, map, "tags"),
            })
        })
        .collect()
}

/// Add `id` to the page list, or retitle it if already listed. Returns
/// `true` when a new entry was created.
pub fn upsert_page(doc: &Doc, id: &str, title: &str, now: i64) -> bool {
    let mut txn = doc.transact_mut();
    let pages = pages_array(&mut txn);
    if let Some((_, map)) = find_page(&txn, &pages, id) {
        if get_str(&txn, &map, "title").as_deref() != Some(title) {
            map.insert(&mut txn, "title", Any::from(title));
        }
        map.insert(&mut txn, "updatedDate", Any::Number(now as f64));
        return false;
    }

    let map: MapRef = pages.push_back(&mut txn, MapPrelim::default());
    map.insert(&mut txn, "id", Any::from(id));
    map.insert(&mut txn, "title", Any::from(title));
    map.insert(&mut txn, "createDate", Any::Number(now as f64));
    map.insert(&mut txn, "updatedDate", Any::Number(now as f64));
    map.insert(&mut txn, "tags", ArrayPrelim::default());
    true
}

/// Bump `updatedDate` (and the title when given). Missing pages are added.
pub fn touch(doc: &Doc, id: &str, title: Option<&str>, now: i64) {
    let existing = {
        let mut txn = doc.transact_mut();
        let pages = pages_array(&mut txn);
        match find_page(&txn, &pages, id) {
            Some((_, map)) => {
                if let Some(title) = title {
                    if get_str(&txn, &map, "title").as_deref() != Some(title) {
                        map.insert(&mut txn, "title", Any::from(title));
                    }
                }
                map.insert(&mut txn, "updatedDate", Any::Number(now as f64));
                true
            }
            None => false,
        }
    };
    if !existing {
        upsert_page(doc, id, title.unwrap_or_default(), now);
    }
}

/// Drop `id` from the page list. Returns `false` when it was not listed.
pub fn remove_page(doc: &Doc, id: &str) -> bool {
    let mut txn = doc.transact_mut();
    let pages = pages_array(&mut txn);
    match find_page(&txn, &pages, id) {
        Some((index, _)) => {
            pages.remove(&mut txn, index);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{apply_update, encode_state};

    #[test]
    fn test_upsert_and_list() {
        let doc = Doc::new();
        assert!(list_pages(&doc).is_empty());
        assert!(upsert_page(&doc, "p1", "First", 10));
        assert!(upsert_page(&doc, "p2", "Second", 20));
        assert!(!upsert_page(&doc, "p1", "First again", 30));

        let replica = Doc::new();
        apply_update(&replica, &encode_state(&doc)).unwrap();
        let pages = list_pages(&replica);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].title, "First again");
        assert_eq!(pages[0].create_date, Some(10));
        assert_eq!(pages[0].updated_date, Some(30));
        assert_eq!(pages[1].id, "p2");
    }

    #[test]
    fn test_touch_updates_or_inserts() {
        let doc = Doc::new();
        upsert_page(&doc, "p1", "Title", 1);
        touch(&doc, "p1", None, 5);
        touch(&doc, "p2", Some("New"), 6);

        let pages = list_pages(&doc);
        assert_eq!(pages[0].title, "Title");
        assert_eq!(pages[0].updated_date, Some(5));
        assert_eq!(pages[1].title, "New");
        assert_eq!(pages[1].create_date, Some(6));
    }

    #[test]
    fn test_remove_page() {
        let doc = Doc::new();
        upsert_page(&doc, "p1", "a", 1);
        upsert_page(&doc, "p2", "b", 1);
        assert!(remove_page(&doc, "p1"));
        assert!(!remove_page(&doc, "p1"));
        let ids: Vec<String> = list_pages(&doc).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["p2"]);
    }
}
