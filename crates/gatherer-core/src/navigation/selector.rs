//! Element queries over page content, by CSS selector or XPath subset.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

use super::xpath::{self, Target};
use crate::error::EngineError;

/// XPath if it starts with `/`, or contains `[@` or `::`; CSS otherwise.
pub fn is_xpath(selector: &str) -> bool {
    let s = selector.trim_start();
    s.starts_with('/') || s.contains("[@") || s.contains("::")
}

fn compile(selector: &str) -> Result<(Selector, Target), EngineError> {
    let (css, target) = if is_xpath(selector) {
        let q = xpath::translate(selector)
            .map_err(|e| EngineError::Script(format!("unsupported XPath '{}': {}", selector, e)))?;
        (q.css, q.target)
    } else {
        (selector.to_string(), Target::Elements)
    };
    let parsed = Selector::parse(&css)
        .map_err(|e| EngineError::Script(format!("invalid selector '{}': {}", selector, e)))?;
    Ok((parsed, target))
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect()
}

fn direct_text(el: &ElementRef<'_>) -> String {
    el.children()
        .filter_map(|child| child.value().as_text().map(|t| {
            let s: &str = t;
            s.to_string()
        }))
        .collect()
}

/// Text of every match, in document order. An XPath ending in `@attr` or
/// `text()` yields attribute values or direct text instead.
pub fn query(content: &str, selector: &str) -> Result<Vec<String>, EngineError> {
    let (sel, target) = compile(selector)?;
    let doc = Html::parse_document(content);
    let out = doc
        .select(&sel)
        .filter_map(|el| match &target {
            Target::Elements => Some(element_text(&el)),
            Target::Text => Some(direct_text(&el)),
            Target::Attribute(name) => el.value().attr(name).map(str::to_string),
        })
        .collect();
    Ok(out)
}

/// Value of `name` on every match that carries it.
pub fn get_attribute(content: &str, selector: &str, name: &str) -> Result<Vec<String>, EngineError> {
    let (sel, target) = compile(selector)?;
    if target != Target::Elements {
        return Err(EngineError::Script(format!(
            "selector '{}' must select elements, not attributes or text",
            selector
        )));
    }
    let doc = Html::parse_document(content);
    Ok(doc
        .select(&sel)
        .filter_map(|el| el.value().attr(name).map(str::to_string))
        .collect())
}

/// Outer HTML of matches whose text contains `text`.
pub fn find_by_text(content: &str, text: &str, selector: &str) -> Result<Vec<String>, EngineError> {
    let (sel, _) = compile(selector)?;
    let doc = Html::parse_document(content);
    Ok(doc
        .select(&sel)
        .filter(|el| element_text(el).contains(text))
        .map(|el| el.html())
        .collect())
}

/// An element whose text contains the searched string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub text: String,
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub id: Option<String>,
    pub class: Option<String>,
}

/// Every element, outermost first, whose full text contains `text`.
/// Ancestors of a match match too.
pub fn query_by_text(content: &str, text: &str) -> Vec<TextMatch> {
    let doc = Html::parse_document(content);
    let Ok(all) = Selector::parse("*") else {
        return Vec::new();
    };
    doc.select(&all)
        .filter_map(|el| {
            let full = element_text(&el);
            if !full.contains(text) {
                return None;
            }
            let value = el.value();
            Some(TextMatch {
                text: full,
                tag: value.name().to_string(),
                attrs: value
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                id: value.attr("id").map(str::to_string),
                class: value.attr("class").map(str::to_string),
            })
        })
        .collect()
}
