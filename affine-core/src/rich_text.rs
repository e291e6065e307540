//! Rich text values stored in `prop:text` fields.
//!
//! A [`RichText`] is a sequence of runs, each an insert string plus a set of
//! formatting attributes. The CRDT text type extends a formatting attribute
//! into following inserts unless that insert explicitly resets it, so every
//! run produced by [`RichText::from_runs`] carries every attribute key used
//! anywhere in the text, with [`AttrValue::Null`] where the mark is inactive.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use yrs::types::text::{Diff, YChange};
use yrs::types::Attrs;
use yrs::{Any, Out, Text, TextRef, TransactionMut};

/// Inline formatting understood by the markdown converters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Bold,
    Italic,
    Underline,
    Strike,
    Code,
    Link,
    Reference,
}

impl Mark {
    pub const ALL: [Mark; 7] = [
        Mark::Bold,
        Mark::Italic,
        Mark::Underline,
        Mark::Strike,
        Mark::Code,
        Mark::Link,
        Mark::Reference,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Mark::Bold => "bold",
            Mark::Italic => "italic",
            Mark::Underline => "underline",
            Mark::Strike => "strike",
            Mark::Code => "code",
            Mark::Link => "link",
            Mark::Reference => "reference",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Mark::ALL.into_iter().find(|m| m.key() == key)
    }
}

/// Attribute value; `Null` is an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Null,
    Bool(bool),
    Str(String),
    Reference { page_id: String },
}

impl AttrValue {
    pub fn is_active(&self) -> bool {
        match self {
            AttrValue::Null | AttrValue::Bool(false) => false,
            AttrValue::Str(s) => !s.is_empty(),
            AttrValue::Bool(true) | AttrValue::Reference { .. } => true,
        }
    }

    fn to_any(&self) -> Any {
        match self {
            AttrValue::Null => Any::Null,
            AttrValue::Bool(b) => Any::Bool(*b),
            AttrValue::Str(s) => Any::from(s.as_str()),
            AttrValue::Reference { page_id } => {
                let mut map = HashMap::new();
                map.insert("type".to_string(), Any::from("LinkedPage"));
                map.insert("pageId".to_string(), Any::from(page_id.as_str()));
                Any::Map(Arc::new(map))
            }
        }
    }

    fn from_any(mark: Mark, value: &Any) -> Self {
        match (mark, value) {
            (_, Any::Bool(b)) => AttrValue::Bool(*b),
            (Mark::Reference, Any::Map(map)) => match map.get("pageId") {
                Some(Any::String(id)) => AttrValue::Reference {
                    page_id: id.to_string(),
                },
                _ => AttrValue::Null,
            },
            (_, Any::String(s)) => AttrValue::Str(s.to_string()),
            _ => AttrValue::Null,
        }
    }
}

pub type TextAttrs = BTreeMap<Mark, AttrValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub insert: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: TextAttrs,
}

impl TextRun {
    pub fn plain(insert: impl Into<String>) -> Self {
        Self {
            insert: insert.into(),
            attrs: TextAttrs::new(),
        }
    }

    pub fn with(mut self, mark: Mark, value: AttrValue) -> Self {
        self.attrs.insert(mark, value);
        self
    }

    pub fn is_active(&self, mark: Mark) -> bool {
        self.attrs.get(&mark).is_some_and(AttrValue::is_active)
    }

    pub fn link(&self) -> Option<&str> {
        match self.attrs.get(&Mark::Link) {
            Some(AttrValue::Str(url)) if !url.is_empty() => Some(url),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self.attrs.get(&Mark::Reference) {
            Some(AttrValue::Reference { page_id }) => Some(page_id),
            _ => None,
        }
    }

    fn active_attrs(&self) -> TextAttrs {
        self.attrs
            .iter()
            .filter(|(_, v)| v.is_active())
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    fn to_yrs_attrs(&self) -> Attrs {
        self.attrs
            .iter()
            .map(|(mark, value)| (Arc::from(mark.key()), value.to_any()))
            .collect()
    }
}

/// Formatted text; the runs always satisfy the explicit-reset invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    runs: Vec<TextRun>,
}

impl RichText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::from_runs(vec![TextRun::plain(text)])
    }

    /// Build a rich text from arbitrary runs.
    ///
    /// Empty runs are dropped, `false` attributes become explicit nulls,
    /// every run receives every mark key used anywhere in the text (null when
    /// inactive) and adjacent runs with identical formatting are merged.
    pub fn from_runs(runs: Vec<TextRun>) -> Self {
        let runs: Vec<TextRun> = runs
            .into_iter()
            .filter(|r| !r.insert.is_empty())
            .map(|r| TextRun {
                attrs: r.active_attrs(),
                insert: r.insert,
            })
            .collect();

        let used: BTreeSet<Mark> = runs.iter().flat_map(|r| r.attrs.keys().copied()).collect();

        let mut merged: Vec<TextRun> = Vec::with_capacity(runs.len());
        for mut run in runs {
            for mark in &used {
                run.attrs.entry(*mark).or_insert(AttrValue::Null);
            }
            match merged.last_mut() {
                Some(prev) if prev.attrs == run.attrs => prev.insert.push_str(&run.insert),
                _ => merged.push(run),
            }
        }

        Self { runs: merged }
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Unformatted content.
    pub fn to_plain(&self) -> String {
        self.runs.iter().map(|r| r.insert.as_str()).collect()
    }

    /// Marks active somewhere in the text.
    pub fn used_marks(&self) -> BTreeSet<Mark> {
        self.runs
            .iter()
            .flat_map(|r| r.attrs.iter())
            .filter(|(_, v)| v.is_active())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Read a CRDT text value.
    pub fn read<T: yrs::ReadTxn>(txn: &T, text: &TextRef) -> Self {
        let diffs: Vec<Diff<YChange>> = text.diff(txn, YChange::identity);
        let runs = diffs
            .into_iter()
            .filter_map(|diff| {
                let insert = match diff.insert {
                    Out::Any(Any::String(s)) => s.to_string(),
                    _ => return None,
                };
                let attrs = diff
                    .attributes
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|(key, value)| {
                                let mark = Mark::from_key(key)?;
                                Some((mark, AttrValue::from_any(mark, value)))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(TextRun { insert, attrs })
            })
            .collect();
        Self::from_runs(runs)
    }

    /// Splice this value into an existing CRDT text, keeping its identity.
    pub fn write(&self, txn: &mut TransactionMut, text: &TextRef) {
        let len = text.len(&*txn);
        if len > 0 {
            text.remove_range(txn, 0, len);
        }
        let mut offset = 0u32;
        for run in &self.runs {
            if run.attrs.is_empty() {
                text.insert(txn, offset, &run.insert);
            } else {
                text.insert_with_attributes(txn, offset, &run.insert, run.to_yrs_attrs());
            }
            offset += run.insert.len() as u32;
        }
    }
}

impl From<&str> for RichText {
    fn from(text: &str) -> Self {
        RichText::plain(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{Doc, GetString, Transact, WriteTxn};

    fn bold(text: &str) -> TextRun {
        TextRun::plain(text).with(Mark::Bold, AttrValue::Bool(true))
    }

    #[test]
    fn test_every_run_carries_every_used_mark() {
        let text = RichText::from_runs(vec![
            TextRun::plain("plain "),
            bold("strong"),
            TextRun::plain(" tail").with(Mark::Link, AttrValue::Str("https://x.dev".into())),
        ]);

        for run in text.runs() {
            assert!(run.attrs.contains_key(&Mark::Bold), "{run:?}");
            assert!(run.attrs.contains_key(&Mark::Link), "{run:?}");
        }
        assert_eq!(text.runs()[0].attrs[&Mark::Bold], AttrValue::Null);
        assert_eq!(text.runs()[2].attrs[&Mark::Bold], AttrValue::Null);
    }

    #[test]
    fn test_unformatted_text_has_no_attributes() {
        let text = RichText::plain("hello");
        assert_eq!(text.runs().len(), 1);
        assert!(text.runs()[0].attrs.is_empty());
    }

    #[test]
    fn test_adjacent_runs_merge_and_false_becomes_null() {
        let text = RichText::from_runs(vec![
            TextRun::plain("a").with(Mark::Italic, AttrValue::Bool(false)),
            TextRun::plain("b"),
            TextRun::plain(""),
        ]);
        assert_eq!(text.runs(), &[TextRun::plain("ab")]);
    }

    // Without explicit nulls the CRDT carries bold into the trailing run.
    #[test]
    fn test_written_formatting_does_not_bleed_into_following_text() {
        let doc = Doc::new();
        let value = RichText::from_runs(vec![bold("Bold"), TextRun::plain(" normal")]);

        let mut txn = doc.transact_mut();
        let text = txn.get_or_insert_text("t");
        value.write(&mut txn, &text);
        assert_eq!(text.get_string(&txn), "Bold normal");

        let back = RichText::read(&txn, &text);
        assert_eq!(back.runs().len(), 2);
        assert!(back.runs()[0].is_active(Mark::Bold));
        assert!(!back.runs()[1].is_active(Mark::Bold));
        assert_eq!(back.to_plain(), "Bold normal");
    }

    #[test]
    fn test_rewriting_keeps_the_same_text_value() {
        let doc = Doc::new();
        let mut txn = doc.transact_mut();
        let text = txn.get_or_insert_text("t");
        RichText::plain("first").write(&mut txn, &text);
        RichText::from_runs(vec![TextRun::plain("sec"), bold("ond")]).write(&mut txn, &text);
        assert_eq!(text.get_string(&txn), "second");
    }

    #[test]
    fn test_reference_attributes_round_trip() {
        let doc = Doc::new();
        let mut txn = doc.transact_mut();
        let text = txn.get_or_insert_text("t");
        let value = RichText::from_runs(vec![TextRun::plain("see ").with(
            Mark::Reference,
            AttrValue::Null,
        ), TextRun::plain("Other").with(
            Mark::Reference,
            AttrValue::Reference {
                page_id: "doc42".into(),
            },
        )]);
        value.write(&mut txn, &text);
        let back = RichText::read(&txn, &text);
        assert_eq!(back.runs()[1].reference(), Some("doc42"));
    }
}
