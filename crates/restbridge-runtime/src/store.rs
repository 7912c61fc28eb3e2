use std::collections::HashMap;

use restbridge_common::{ReturnCode, MAX_KEY_LEN};
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::node::Node;

/// Integer handle the VM uses to refer to a stored [`Node`].
pub type Handle = i32;

/// Owns every node the VM can address, keyed by handle.
///
/// Handles are assigned monotonically and never reused, so a stale handle
/// fails lookup instead of aliasing a newer value. The store is only ever
/// touched from the VM thread and needs no locking.
#[derive(Debug)]
pub struct ValueStore {
    nodes: HashMap<Handle, Node>,
    next_handle: Handle,
    max_key_len: usize,
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueStore {
    pub fn new() -> Self {
        Self::with_max_key_len(MAX_KEY_LEN)
    }

    pub fn with_max_key_len(max_key_len: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            next_handle: 0,
            max_key_len,
        }
    }

    /// Take ownership of `node` and return its new handle.
    ///
    /// Fails only once every non-negative handle has been issued; `node` is
    /// dropped in that case.
    pub fn allocate(&mut self, node: Node) -> Result<Handle> {
        let handle = self.next_handle;
        self.next_handle = handle
            .checked_add(1)
            .ok_or(BridgeError::Exhausted("value handle"))?;
        self.nodes.insert(handle, node);
        Ok(handle)
    }

    /// Borrow the node behind `handle` without copying or releasing it.
    pub fn peek(&self, handle: Handle) -> Result<&Node> {
        if handle < 0 || handle >= self.next_handle {
            return Err(BridgeError::UnknownHandle(handle));
        }
        self.nodes
            .get(&handle)
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    /// Copy the node behind `handle`, releasing it afterwards if `consume`.
    pub fn try_get(&mut self, handle: Handle, consume: bool) -> Result<Node> {
        if consume {
            self.peek(handle)?;
            self.nodes
                .remove(&handle)
                .ok_or(BridgeError::UnknownHandle(handle))
        } else {
            self.peek(handle).cloned()
        }
    }

    /// Like [`try_get`](Self::try_get) but yields `Node::Null` for a handle
    /// that is not live.
    pub fn get(&mut self, handle: Handle, consume: bool) -> Node {
        match self.try_get(handle, consume) {
            Ok(node) => node,
            Err(e) => {
                warn!(handle, next = self.next_handle, "get failed: {}", e);
                Node::Null
            }
        }
    }

    /// Drop the node behind `handle`. Unknown or already released handles
    /// are a logged no-op reported as `UnknownHandle`.
    pub fn release(&mut self, handle: Handle) -> ReturnCode {
        match self.nodes.remove(&handle) {
            Some(_) => ReturnCode::Ok,
            None => {
                warn!(handle, "release of a handle that is not live");
                ReturnCode::UnknownHandle
            }
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.nodes.contains_key(&handle)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every live node. Handle numbering continues where it left off.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    // ========================================================================
    // Construction
    // ========================================================================

    pub fn int(&mut self, value: i64) -> Result<Handle> {
        self.allocate(Node::Int(value))
    }

    pub fn float(&mut self, value: f64) -> Result<Handle> {
        self.allocate(Node::Float(value))
    }

    pub fn bool(&mut self, value: bool) -> Result<Handle> {
        self.allocate(Node::Bool(value))
    }

    pub fn string(&mut self, value: impl Into<String>) -> Result<Handle> {
        self.allocate(Node::String(value.into()))
    }

    /// Build an object from `(key, child)` pairs. Children are deep-copied
    /// and stay live; nothing is allocated if any pair is invalid.
    pub fn object(&mut self, fields: &[(&str, Handle)]) -> Result<Handle> {
        let mut built = Vec::with_capacity(fields.len());
        for (key, child) in fields {
            self.check_key(key)?;
            built.push((key.to_string(), self.child(*child)?));
        }
        self.allocate(Node::Object(built))
    }

    /// Build an array from child handles, copied in order.
    pub fn array(&mut self, children: &[Handle]) -> Result<Handle> {
        let built = children
            .iter()
            .map(|&child| self.child(child))
            .collect::<Result<Vec<_>>>()?;
        self.allocate(Node::Array(built))
    }

    /// Parse JSON text into a new node.
    pub fn parse(&mut self, text: &str) -> Result<Handle> {
        let node = Node::from_json_str(text)?;
        self.allocate(node)
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if key.is_empty() || key.len() > self.max_key_len {
            warn!(len = key.len(), "object key length out of bounds");
            return Err(BridgeError::KeyLength {
                len: key.len(),
                max: self.max_key_len,
            });
        }
        Ok(())
    }

    fn child(&self, handle: Handle) -> Result<Node> {
        match self.peek(handle) {
            Ok(node) if !node.is_null() => Ok(node.clone()),
            _ => {
                warn!(handle, "value node was invalid");
                Err(BridgeError::InvalidChild(handle))
            }
        }
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Copy field `key` of the object at `handle` into a new handle.
    pub fn object_field(&mut self, handle: Handle, key: &str, consume: bool) -> Result<Handle> {
        let field = self.peek(handle)?.field(key)?.clone();
        self.finish_read(handle, consume);
        self.allocate(field)
    }

    /// Copy element `index` of the array at `handle` into a new handle.
    pub fn array_element(&mut self, handle: Handle, index: i64, consume: bool) -> Result<Handle> {
        let element = self.peek(handle)?.element(index)?.clone();
        self.finish_read(handle, consume);
        self.allocate(element)
    }

    pub fn array_len(&mut self, handle: Handle, consume: bool) -> Result<usize> {
        let len = match self.peek(handle)? {
            Node::Array(items) => items.len(),
            other => {
                return Err(BridgeError::TypeMismatch {
                    expected: "array",
                    found: other.type_name(),
                })
            }
        };
        self.finish_read(handle, consume);
        Ok(len)
    }

    pub fn int_at(&mut self, handle: Handle, consume: bool) -> Result<i64> {
        let value = self.peek(handle)?.as_int()?;
        self.finish_read(handle, consume);
        Ok(value)
    }

    pub fn float_at(&mut self, handle: Handle, consume: bool) -> Result<f64> {
        let value = self.peek(handle)?.as_float()?;
        self.finish_read(handle, consume);
        Ok(value)
    }

    pub fn bool_at(&mut self, handle: Handle, consume: bool) -> Result<bool> {
        let value = self.peek(handle)?.as_bool()?;
        self.finish_read(handle, consume);
        Ok(value)
    }

    pub fn string_at(&mut self, handle: Handle, consume: bool) -> Result<String> {
        let value = self.peek(handle)?.as_str()?.to_string();
        self.finish_read(handle, consume);
        Ok(value)
    }

    /// Serialize the node at `handle`. Never consumes.
    pub fn stringify(&self, handle: Handle) -> Result<String> {
        self.peek(handle)?.to_json_string()
    }

    // Only called after a successful read, so a failed access leaves the
    // source handle live.
    fn finish_read(&mut self, handle: Handle, consume: bool) {
        if consume {
            self.nodes.remove(&handle);
        }
    }
}
