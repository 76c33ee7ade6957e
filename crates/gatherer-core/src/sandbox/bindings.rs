//! rhai bindings for `HostApi`. The only place that converts between rhai
//! `Dynamic` values and the typed host API.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position};

use super::api::{HostApi, LogLevel, TextMatch};
use crate::error::EngineError;
use crate::params::ParamValue;

type RhaiResultOf<T> = Result<T, Box<EvalAltResult>>;

/// Termination value used when the task's token is observed.
pub(crate) const CANCELED_TAG: &str = "canceled";
/// Termination value used when the wall-clock limit is hit.
pub(crate) const TIMEOUT_TAG: &str = "timeout";

/// Cancellation terminates the run (not catchable by `try`); everything else
/// becomes a runtime error the script may catch.
pub(crate) fn host_error(err: EngineError) -> Box<EvalAltResult> {
    match err {
        EngineError::Canceled => {
            EvalAltResult::ErrorTerminated(Dynamic::from(CANCELED_TAG.to_string()), Position::NONE)
                .into()
        }
        other => EvalAltResult::ErrorRuntime(Dynamic::from(other.to_string()), Position::NONE).into(),
    }
}

pub(crate) fn param_to_dynamic(value: &ParamValue) -> Dynamic {
    match value {
        ParamValue::Int(v) => Dynamic::from(*v),
        ParamValue::Float(v) => Dynamic::from(*v),
        ParamValue::Bool(v) => Dynamic::from(*v),
        ParamValue::Option(v) | ParamValue::Path(v) | ParamValue::Text(v) => {
            Dynamic::from(v.clone())
        }
        ParamValue::MultiOption(set) => Dynamic::from(
            set.iter()
                .map(|s| Dynamic::from(s.clone()))
                .collect::<Array>(),
        ),
    }
}

fn json_to_dynamic(value: serde_json::Value) -> RhaiResultOf<Dynamic> {
    rhai::serde::to_dynamic(value)
}

fn text_match_to_map(found: TextMatch) -> Dynamic {
    let mut map = Map::new();
    map.insert("text".into(), found.text.into());
    map.insert("tag".into(), found.tag.into());
    let attrs: Map = found
        .attrs
        .into_iter()
        .map(|(k, v)| (k.into(), Dynamic::from(v)))
        .collect();
    map.insert("attrs".into(), Dynamic::from_map(attrs));
    if let Some(id) = found.id {
        map.insert("id".into(), id.into());
    }
    if let Some(class) = found.class {
        map.insert("class".into(), class.into());
    }
    Dynamic::from_map(map)
}

/// False for patterns that do not compile.
fn re_is_match(pattern: &str, text: &str) -> bool {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn strings(values: Vec<String>) -> Array {
    values.into_iter().map(Dynamic::from).collect()
}

fn string_list(values: Array) -> RhaiResultOf<Vec<String>> {
    values
        .into_iter()
        .map(|v| {
            v.into_string().map_err(|actual| {
                EvalAltResult::ErrorMismatchDataType("string".into(), actual.into(), Position::NONE)
                    .into()
            })
        })
        .collect()
}

pub(crate) fn register_host_api<H: HostApi + 'static>(engine: &mut Engine, host: &Rc<RefCell<H>>) {
    for name in ["navigate", "to"] {
        let h = Rc::clone(host);
        engine.register_fn(name, move |url: &str| -> RhaiResultOf<()> {
            h.borrow_mut().navigate(url).map_err(host_error)
        });
    }

    for name in ["fetch_json", "to_json"] {
        let h = Rc::clone(host);
        engine.register_fn(name, move |url: &str| -> RhaiResultOf<Dynamic> {
            let value = h.borrow_mut().fetch_json(url).map_err(host_error)?;
            json_to_dynamic(value)
        });
    }

    let h = Rc::clone(host);
    engine.register_fn("back", move || -> RhaiResultOf<()> {
        h.borrow_mut().back().map_err(host_error)
    });

    let h = Rc::clone(host);
    engine.register_fn("current_url", move || -> RhaiResultOf<String> {
        h.borrow().current_url().map_err(host_error)
    });

    for name in ["current_content", "current_html"] {
        let h = Rc::clone(host);
        engine.register_fn(name, move || -> RhaiResultOf<String> {
            h.borrow().current_content().map_err(host_error)
        });
    }

    let h = Rc::clone(host);
    engine.register_fn("query", move |selector: &str| -> RhaiResultOf<Array> {
        h.borrow().query(selector).map(strings).map_err(host_error)
    });

    for name in ["get_attribute", "get_attr"] {
        let h = Rc::clone(host);
        engine.register_fn(name, move |selector: &str, attr: &str| -> RhaiResultOf<Array> {
            h.borrow()
                .get_attribute(selector, attr)
                .map(strings)
                .map_err(host_error)
        });
    }

    let h = Rc::clone(host);
    engine.register_fn("find_by_text", move |text: &str, selector: &str| -> RhaiResultOf<Array> {
        h.borrow()
            .find_by_text(text, selector)
            .map(strings)
            .map_err(host_error)
    });

    let h = Rc::clone(host);
    engine.register_fn("query_by_text", move |text: &str| -> RhaiResultOf<Array> {
        h.borrow()
            .query_by_text(text)
            .map(|found| found.into_iter().map(text_match_to_map).collect())
            .map_err(host_error)
    });

    engine.register_fn("re_is_match", |pattern: &str, text: &str| re_is_match(pattern, text));

    for name in ["resolve", "resolve_url"] {
        let h = Rc::clone(host);
        engine.register_fn(name, move |relative: &str| -> String { h.borrow().resolve(relative) });
    }

    let h = Rc::clone(host);
    engine.register_fn("is_image_url", move |url: &str| -> bool { h.borrow().is_image_url(url) });

    let h = Rc::clone(host);
    engine.register_fn("download_image", move |url: &str| -> RhaiResultOf<bool> {
        h.borrow_mut().download_image(url).map_err(host_error)
    });

    let h = Rc::clone(host);
    engine.register_fn("download_archive", move |url: &str, kind: &str| -> RhaiResultOf<i64> {
        h.borrow_mut()
            .download_archive(url, kind)
            .map(|n| n as i64)
            .map_err(host_error)
    });
    let h = Rc::clone(host);
    engine.register_fn("download_archive", move |url: &str| -> RhaiResultOf<i64> {
        h.borrow_mut()
            .download_archive(url, "")
            .map(|n| n as i64)
            .map_err(host_error)
    });

    let h = Rc::clone(host);
    engine.register_fn("add_progress", move |delta: f64| -> RhaiResultOf<()> {
        h.borrow_mut().add_progress(delta).map_err(host_error)
    });
    let h = Rc::clone(host);
    engine.register_fn("add_progress", move |delta: i64| -> RhaiResultOf<()> {
        h.borrow_mut().add_progress(delta as f64).map_err(host_error)
    });

    let h = Rc::clone(host);
    engine.register_fn(
        "list_local_files",
        move |folder: &str, extensions: Array| -> RhaiResultOf<Array> {
            let extensions = string_list(extensions)?;
            h.borrow_mut()
                .list_local_files(folder, &extensions, false)
                .map(strings)
                .map_err(host_error)
        },
    );
    let h = Rc::clone(host);
    engine.register_fn(
        "list_local_files",
        move |folder: &str, extensions: Array, recursive: bool| -> RhaiResultOf<Array> {
            let extensions = string_list(extensions)?;
            h.borrow_mut()
                .list_local_files(folder, &extensions, recursive)
                .map(strings)
                .map_err(host_error)
        },
    );

    let h = Rc::clone(host);
    engine.register_fn("set_header", move |name: &str, value: &str| {
        h.borrow_mut().set_header(name, value)
    });

    let h = Rc::clone(host);
    engine.register_fn("delete_header", move |name: &str| h.borrow_mut().delete_header(name));

    let h = Rc::clone(host);
    engine.on_print(move |message| h.borrow_mut().log(LogLevel::Info, message));

    let h = Rc::clone(host);
    engine.on_debug(move |message, _source, pos| {
        let line = match pos.line() {
            Some(line) => format!("line {}: {}", line, message),
            None => message.to_string(),
        };
        h.borrow_mut().log(LogLevel::Debug, &line)
    });
}
