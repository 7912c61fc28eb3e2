//! Integer-in, integer-out surface exposed to the script VM.
//!
//! Value constructors return a non-negative handle or a negative
//! [`ReturnCode`]. Everything else returns `0` on success or a code, and
//! writes its result through an out parameter that is left untouched on
//! failure. Request natives take a [`CallContext`], so they work the same
//! from host code ([`Bridge::context`](crate::Bridge::context)) and from
//! inside a callback.

use restbridge_common::ReturnCode;

use crate::callback::CallContext;
use crate::completion::OperationId;
use crate::error::{BridgeError, Result};
use crate::request::{HeaderSetId, RequestId, RequestOptions};
use crate::store::{Handle, ValueStore};

/// A VM cell.
pub type Cell = i32;

fn code_of<T>(result: Result<T>) -> Cell {
    match result {
        Ok(_) => ReturnCode::Ok.as_i32(),
        Err(e) => e.code().as_i32(),
    }
}

fn handle_or_code(result: Result<Handle>) -> Cell {
    match result {
        Ok(handle) => handle,
        Err(e) => e.code().as_i32(),
    }
}

/// `buf_size` is the size of the VM's destination buffer, terminator
/// included, so at most `buf_size - 1` bytes fit.
fn write_bounded(text: String, out: &mut String, buf_size: usize) -> Result<()> {
    if text.len() >= buf_size {
        return Err(BridgeError::InvalidArgument(format!(
            "output of {} bytes does not fit a buffer of {}",
            text.len(),
            buf_size
        )));
    }
    *out = text;
    Ok(())
}

/// Operation ids are `u64` on the host; the VM sees them as cells.
fn operation_or_code(result: Result<OperationId>, out: &mut Cell) -> Cell {
    let result = result.and_then(|op| {
        Cell::try_from(op).map_err(|_| BridgeError::Exhausted("operation"))
    });
    code_of(result.map(|op| *out = op))
}

/// Split a flat `[key, value, key, value, ..]` list into pairs.
fn pairs<'a>(flat: &[&'a str]) -> Result<Vec<(&'a str, &'a str)>> {
    if flat.len() % 2 != 0 {
        return Err(BridgeError::InvalidArgument(format!(
            "expected key/value pairs, got {} strings",
            flat.len()
        )));
    }
    Ok(flat.chunks(2).map(|pair| (pair[0], pair[1])).collect())
}

// ============================================================================
// JSON construction
// ============================================================================

pub fn json_object(store: &mut ValueStore, fields: &[(&str, Handle)]) -> Cell {
    handle_or_code(store.object(fields))
}

pub fn json_array(store: &mut ValueStore, children: &[Handle]) -> Cell {
    handle_or_code(store.array(children))
}

pub fn json_int(store: &mut ValueStore, value: Cell) -> Cell {
    handle_or_code(store.int(i64::from(value)))
}

pub fn json_float(store: &mut ValueStore, value: f32) -> Cell {
    handle_or_code(store.float(f64::from(value)))
}

pub fn json_bool(store: &mut ValueStore, value: bool) -> Cell {
    handle_or_code(store.bool(value))
}

pub fn json_string(store: &mut ValueStore, value: &str) -> Cell {
    handle_or_code(store.string(value))
}

pub fn json_parse(store: &mut ValueStore, text: &str, out: &mut Handle) -> Cell {
    code_of(store.parse(text).map(|handle| *out = handle))
}

// ============================================================================
// JSON access
// ============================================================================

pub fn json_get_object(
    store: &mut ValueStore,
    node: Handle,
    key: &str,
    out: &mut Handle,
    consume: bool,
) -> Cell {
    code_of(store.object_field(node, key, consume).map(|h| *out = h))
}

pub fn json_array_object(
    store: &mut ValueStore,
    node: Handle,
    index: Cell,
    out: &mut Handle,
    consume: bool,
) -> Cell {
    code_of(
        store
            .array_element(node, i64::from(index), consume)
            .map(|h| *out = h),
    )
}

pub fn json_array_length(store: &mut ValueStore, node: Handle, out: &mut Cell, consume: bool) -> Cell {
    let result = store.array_len(node, consume).and_then(|len| {
        Cell::try_from(len).map_err(|_| BridgeError::InvalidArgument("array too long".to_string()))
    });
    code_of(result.map(|len| *out = len))
}

pub fn json_get_node_int(store: &mut ValueStore, node: Handle, out: &mut Cell, consume: bool) -> Cell {
    let value = match store.peek(node).and_then(|n| n.as_int()) {
        Ok(v) => v,
        Err(e) => return e.code().as_i32(),
    };
    let Ok(value) = Cell::try_from(value) else {
        return ReturnCode::InvalidArgument.as_i32();
    };
    code_of(store.int_at(node, consume).map(|_| *out = value))
}

pub fn json_get_node_float(store: &mut ValueStore, node: Handle, out: &mut f32, consume: bool) -> Cell {
    code_of(store.float_at(node, consume).map(|v| *out = v as f32))
}

pub fn json_get_node_bool(store: &mut ValueStore, node: Handle, out: &mut bool, consume: bool) -> Cell {
    code_of(store.bool_at(node, consume).map(|v| *out = v))
}

pub fn json_get_node_string(
    store: &mut ValueStore,
    node: Handle,
    out: &mut String,
    buf_size: usize,
    consume: bool,
) -> Cell {
    let fits = store
        .peek(node)
        .and_then(|n| n.as_str().map(|s| s.len() < buf_size));
    match fits {
        Ok(true) => code_of(
            store
                .string_at(node, consume)
                .and_then(|s| write_bounded(s, out, buf_size)),
        ),
        Ok(false) => ReturnCode::InvalidArgument.as_i32(),
        Err(e) => e.code().as_i32(),
    }
}

pub fn json_stringify(store: &ValueStore, node: Handle, out: &mut String, buf_size: usize) -> Cell {
    code_of(
        store
            .stringify(node)
            .and_then(|text| write_bounded(text, out, buf_size)),
    )
}

pub fn json_cleanup(store: &mut ValueStore, node: Handle) -> Cell {
    store.release(node).as_i32()
}

// ============================================================================
// Requests
// ============================================================================

/// Create a request against `endpoint`. `options` is a flat key/value list
/// with keys `timeout_ms`, `base_path` and `headers` (a header set id).
pub fn request_client(
    cx: &mut CallContext<'_>,
    endpoint: &str,
    options: &[&str],
    out: &mut RequestId,
) -> Cell {
    let result = pairs(options)
        .and_then(|pairs| RequestOptions::from_pairs(&pairs))
        .and_then(|options| cx.issuer.create_request(endpoint, options));
    code_of(result.map(|id| *out = id))
}

/// Register a header set from a flat name/value list.
pub fn request_headers(cx: &mut CallContext<'_>, headers: &[&str], out: &mut HeaderSetId) -> Cell {
    let result = pairs(headers).and_then(|pairs| {
        let headers = pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        cx.issuer.register_headers(headers)
    });
    code_of(result.map(|id| *out = id))
}

pub fn request_get(
    cx: &mut CallContext<'_>,
    request: RequestId,
    path: &str,
    callback: &str,
    out: &mut Cell,
) -> Cell {
    operation_or_code(cx.issuer.get(request, path, callback), out)
}

pub fn request_post(
    cx: &mut CallContext<'_>,
    request: RequestId,
    path: &str,
    body: &str,
    callback: &str,
    out: &mut Cell,
) -> Cell {
    operation_or_code(cx.issuer.post(request, path, body, callback), out)
}

pub fn request_get_json(
    cx: &mut CallContext<'_>,
    request: RequestId,
    path: &str,
    callback: &str,
    out: &mut Cell,
) -> Cell {
    operation_or_code(cx.issuer.get_json(request, path, callback), out)
}

pub fn request_post_json(
    cx: &mut CallContext<'_>,
    request: RequestId,
    path: &str,
    body: Handle,
    callback: &str,
    out: &mut Cell,
) -> Cell {
    operation_or_code(
        cx.issuer.post_json(cx.store, request, path, body, callback),
        out,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_node_int_on_string_leaves_output_untouched() {
        let mut store = ValueStore::new();
        let s = json_string(&mut store, "not a number");
        let mut out: Cell = 1234;
        assert_eq!(json_get_node_int(&mut store, s, &mut out, false), 1);
        assert_eq!(out, 1234);
        assert!(store.contains(s));
    }

    #[test]
    fn get_node_int_success_and_consume() {
        let mut store = ValueStore::new();
        let n = json_int(&mut store, -42);
        let mut out: Cell = 0;
        assert_eq!(json_get_node_int(&mut store, n, &mut out, true), 0);
        assert_eq!(out, -42);
        assert!(!store.contains(n));
    }

    #[test]
    fn get_node_int_out_of_cell_range() {
        let mut store = ValueStore::new();
        let n = store.int(i64::from(i32::MAX) + 1).unwrap();
        let mut out: Cell = 5;
        assert_eq!(json_get_node_int(&mut store, n, &mut out, true), -1);
        assert_eq!(out, 5);
        assert!(store.contains(n));
    }

    #[test]
    fn object_construction_codes() {
        let mut store = ValueStore::new();
        let a = json_int(&mut store, 1);
        let b = json_string(&mut store, "x");
        let obj = json_object(&mut store, &[("a", a), ("b", b)]);
        assert!(obj >= 0);

        let mut text = String::new();
        assert_eq!(json_stringify(&store, obj, &mut text, 512), 0);
        assert_eq!(text, r#"{"a":1,"b":"x"}"#);

        assert_eq!(json_object(&mut store, &[("a", 500)]), -2);
        let long_key = "k".repeat(600);
        assert_eq!(json_object(&mut store, &[(long_key.as_str(), a)]), -1);
    }

    #[test]
    fn array_access_through_natives() {
        let mut store = ValueStore::new();
        let one = json_float(&mut store, 1.5);
        let two = json_bool(&mut store, true);
        let arr = json_array(&mut store, &[one, two]);

        let mut len = 0;
        assert_eq!(json_array_length(&mut store, arr, &mut len, false), 0);
        assert_eq!(len, 2);

        let mut element = -1;
        assert_eq!(json_array_object(&mut store, arr, 0, &mut element, false), 0);
        let mut value = 0.0f32;
        assert_eq!(json_get_node_float(&mut store, element, &mut value, true), 0);
        assert_eq!(value, 1.5);

        let mut missing = -1;
        assert_eq!(json_array_object(&mut store, arr, 5, &mut missing, false), 2);
        assert_eq!(missing, -1);

        let mut flag = false;
        assert_eq!(json_get_node_bool(&mut store, two, &mut flag, false), 0);
        assert!(flag);
    }

    #[test]
    fn string_output_is_bounded_not_truncated() {
        let mut store = ValueStore::new();
        let s = json_string(&mut store, "abcdef");
        let mut out = String::from("keep");
        assert_eq!(json_get_node_string(&mut store, s, &mut out, 3, true), -1);
        assert_eq!(out, "keep");
        assert!(store.contains(s));
        // "abcdef" needs seven bytes with its terminator.
        assert_eq!(json_get_node_string(&mut store, s, &mut out, 6, true), -1);
        assert_eq!(out, "keep");
        assert_eq!(json_get_node_string(&mut store, s, &mut out, 7, true), 0);
        assert_eq!(out, "abcdef");
        assert!(!store.contains(s));
    }

    #[test]
    fn stringify_bounded() {
        let mut store = ValueStore::new();
        let mut node = -1;
        assert_eq!(json_parse(&mut store, r#"{"long":"value"}"#, &mut node), 0);
        let mut out = String::new();
        assert_eq!(json_stringify(&store, node, &mut out, 4), -1);
        assert!(out.is_empty());

        let exact = r#"{"long":"value"}"#.len();
        assert_eq!(json_stringify(&store, node, &mut out, exact), -1);
        assert_eq!(json_stringify(&store, node, &mut out, exact + 1), 0);
        assert_eq!(out, r#"{"long":"value"}"#);
    }

    #[test]
    fn flat_pairs() {
        assert_eq!(
            pairs(&["timeout_ms", "50", "base_path", "/v1"]).unwrap(),
            vec![("timeout_ms", "50"), ("base_path", "/v1")]
        );
        assert!(pairs(&[]).unwrap().is_empty());
        assert!(matches!(
            pairs(&["timeout_ms"]),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn operation_ids_beyond_a_cell_are_refused() {
        let mut out: Cell = -7;
        assert_eq!(operation_or_code(Ok(3), &mut out), 0);
        assert_eq!(out, 3);
        assert_eq!(operation_or_code(Ok(u64::from(u32::MAX)), &mut out), -1);
        assert_eq!(out, 3);
        assert_eq!(operation_or_code(Err(BridgeError::UnknownRequest(9)), &mut out), 4);
        assert_eq!(out, 3);
    }

    #[test]
    fn parse_failure_code() {
        let mut store = ValueStore::new();
        let mut node = -7;
        assert_eq!(json_parse(&mut store, "[1,", &mut node), 6);
        assert_eq!(node, -7);
    }

    #[test]
    fn get_object_and_cleanup() {
        let mut store = ValueStore::new();
        let mut root = -1;
        json_parse(&mut store, r#"{"inner":{"n":3}}"#, &mut root);
        let mut inner = -1;
        assert_eq!(json_get_object(&mut store, root, "inner", &mut inner, true), 0);
        assert!(!store.contains(root));
        let mut wrong = -1;
        assert_eq!(json_get_object(&mut store, inner, "n", &mut wrong, false), 0);
        let mut nested = -1;
        assert_eq!(json_get_object(&mut store, wrong, "x", &mut nested, false), 1);
        assert_eq!(nested, -1);

        assert_eq!(json_cleanup(&mut store, inner), 0);
        assert_eq!(json_cleanup(&mut store, inner), 3);
    }
}
