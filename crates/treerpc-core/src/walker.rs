//! Reflective walker over a nested tree of async functions.
//!
//! The server side describes its business API as an [`ApiTree`]: internal
//! nodes are named subtrees, leaves are [`Handler`]s or static strings.
//! [`ApiTree::walk`] visits every leaf with its full [`CallPath`], which is
//! how the server builds its registration table.
//!
//! The client side has no tree at all. [`ApiProxy`] records each accessed
//! key and, when called, hands the whole access stack to a [`CallHook`].

use crate::error::Result;
use crate::schema::CallPath;
use crate::shape::RpcShape;
use crate::value::Value;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Lazy sequence of values flowing into or out of a streaming call.
pub type ValueStream = BoxStream<'static, Result<Value>>;

pub type UnaryFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type ClientStreamingFn = Arc<dyn Fn(ValueStream) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type ServerStreamingFn = Arc<dyn Fn(Vec<Value>) -> ValueStream + Send + Sync>;
pub type BidirectionalFn = Arc<dyn Fn(ValueStream) -> ValueStream + Send + Sync>;

/// A callable leaf. The variant fixes the call shape it can serve.
#[derive(Clone)]
pub enum Handler {
    /// Positional arguments in, one eventual value out.
    Unary(UnaryFn),
    /// Inbound sequence in, one eventual value out.
    ClientStreaming(ClientStreamingFn),
    /// Positional arguments in, lazy sequence out.
    ServerStreaming(ServerStreamingFn),
    /// Inbound sequence in, lazy sequence out.
    Bidirectional(BidirectionalFn),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler::{}", self.shape())
    }
}

impl Handler {
    pub fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Handler::Unary(Arc::new(move |args| f(args).boxed()))
    }

    pub fn client_streaming<F, Fut>(f: F) -> Self
    where
        F: Fn(ValueStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Handler::ClientStreaming(Arc::new(move |inbound| f(inbound).boxed()))
    }

    pub fn server_streaming<F, S>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        Handler::ServerStreaming(Arc::new(move |args| f(args).boxed()))
    }

    pub fn bidirectional<F, S>(f: F) -> Self
    where
        F: Fn(ValueStream) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        Handler::Bidirectional(Arc::new(move |inbound| f(inbound).boxed()))
    }

    pub fn shape(&self) -> RpcShape {
        match self {
            Handler::Unary(_) => RpcShape::Unary,
            Handler::ClientStreaming(_) => RpcShape::ClientStreaming,
            Handler::ServerStreaming(_) => RpcShape::ServerStreaming,
            Handler::Bidirectional(_) => RpcShape::Bidirectional,
        }
    }
}

/// One node of the tree.
#[derive(Debug, Clone)]
pub enum ApiNode {
    Leaf(Handler),
    /// Metadata stored beside the callables; never registered as a method.
    Static(String),
    Tree(ApiTree),
}

/// Named children, in name order.
#[derive(Debug, Clone, Default)]
pub struct ApiTree {
    children: BTreeMap<String, ApiNode>,
}

/// Receives the leaves of an [`ApiTree`] during [`ApiTree::walk`].
pub trait TreeVisitor {
    fn visit_leaf(&mut self, path: &CallPath, handler: &Handler) -> Result<()>;

    fn visit_static(&mut self, _path: &CallPath, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// A leaf bound to its resolved path.
#[derive(Debug, Clone)]
pub struct Binding {
    pub path: CallPath,
    pub handler: Handler,
}

impl ApiTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.children.insert(name.into(), ApiNode::Leaf(handler));
        self
    }

    pub fn subtree(mut self, name: impl Into<String>, tree: ApiTree) -> Self {
        self.children.insert(name.into(), ApiNode::Tree(tree));
        self
    }

    pub fn static_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.children.insert(name.into(), ApiNode::Static(value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ApiNode> {
        self.children.get(name)
    }

    /// Follow `path` from the root.
    pub fn resolve(&self, path: &CallPath) -> Option<&ApiNode> {
        let (last, parents) = path.segments().split_last()?;
        let mut tree = self;
        for segment in parents {
            match tree.children.get(segment)? {
                ApiNode::Tree(child) => tree = child,
                _ => return None,
            }
        }
        tree.children.get(last)
    }

    /// Depth-first traversal; the segment stack is the only accumulator.
    pub fn walk<V: TreeVisitor>(&self, visitor: &mut V) -> Result<()> {
        let mut stack = Vec::new();
        self.walk_inner(visitor, &mut stack)
    }

    fn walk_inner<V: TreeVisitor>(&self, visitor: &mut V, stack: &mut Vec<String>) -> Result<()> {
        for (name, node) in &self.children {
            stack.push(name.clone());
            let outcome = match node {
                ApiNode::Tree(child) => child.walk_inner(visitor, stack),
                ApiNode::Leaf(handler) => CallPath::new(stack.iter().cloned())
                    .and_then(|path| visitor.visit_leaf(&path, handler)),
                ApiNode::Static(value) => CallPath::new(stack.iter().cloned())
                    .and_then(|path| visitor.visit_static(&path, value)),
            };
            stack.pop();
            outcome?;
        }
        Ok(())
    }

    /// Flattened registration table of every callable leaf.
    pub fn bindings(&self) -> Result<Vec<Binding>> {
        struct Collect(Vec<Binding>);

        impl TreeVisitor for Collect {
            fn visit_leaf(&mut self, path: &CallPath, handler: &Handler) -> Result<()> {
                self.0.push(Binding {
                    path: path.clone(),
                    handler: handler.clone(),
                });
                Ok(())
            }
        }

        let mut collect = Collect(Vec::new());
        self.walk(&mut collect)?;
        Ok(collect.0)
    }
}

/// One step of a proxy access chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFrame {
    /// `/`-joined path of the node the key was read from; empty at the root.
    pub owner: String,
    pub key: String,
}

/// Invoked when a proxy path is called.
pub trait CallHook: Send + Sync {
    type Output;

    /// `stack` runs from the root to the called leaf.
    fn on_call(&self, stack: &[AccessFrame], args: Vec<Value>) -> Self::Output;
}

/// Path-recording stand-in for a tree that is not known in advance.
pub struct ApiProxy<H> {
    hook: Arc<H>,
    stack: Vec<AccessFrame>,
}

impl<H> Clone for ApiProxy<H> {
    fn clone(&self) -> Self {
        Self {
            hook: self.hook.clone(),
            stack: self.stack.clone(),
        }
    }
}

impl<H: CallHook> ApiProxy<H> {
    pub fn new(hook: Arc<H>) -> Self {
        Self {
            hook,
            stack: Vec::new(),
        }
    }

    /// Access one more key. Any key is accepted.
    pub fn get(&self, key: impl Into<String>) -> Self {
        let owner = self
            .stack
            .iter()
            .map(|frame| frame.key.as_str())
            .collect::<Vec<_>>()
            .join("/");
        let mut stack = Vec::with_capacity(self.stack.len() + 1);
        stack.extend(self.stack.iter().cloned());
        stack.push(AccessFrame {
            owner,
            key: key.into(),
        });
        Self {
            hook: self.hook.clone(),
            stack,
        }
    }

    /// Access each `/`-separated segment of `path` in turn.
    pub fn at(&self, path: &str) -> Self {
        path.split('/').fold(self.clone(), |proxy, key| proxy.get(key))
    }

    pub fn stack(&self) -> &[AccessFrame] {
        &self.stack
    }

    /// Call path reconstructed from the access order.
    pub fn path(&self) -> Result<CallPath> {
        path_of(&self.stack)
    }

    pub fn call(&self, args: Vec<Value>) -> H::Output {
        self.hook.on_call(&self.stack, args)
    }
}

/// Call path of an access stack.
pub fn path_of(stack: &[AccessFrame]) -> Result<CallPath> {
    CallPath::new(stack.iter().map(|frame| frame.key.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    fn sample_tree() -> ApiTree {
        ApiTree::new()
            .subtree(
                "a",
                ApiTree::new()
                    .leaf("it", Handler::unary(|_| async { Ok(Value::from("ok")) }))
                    .subtree(
                        "deep",
                        ApiTree::new().leaf(
                            "st",
                            Handler::server_streaming(|_| stream::iter(vec![Ok(Value::I32(1))])),
                        ),
                    ),
            )
            .leaf("top", Handler::unary(|args| async move { Ok(Value::List(args)) }))
            .static_value("version", "1.2.3")
    }

    #[test]
    fn test_bindings_have_full_paths() {
        let bindings = sample_tree().bindings().unwrap();
        let paths: Vec<String> = bindings.iter().map(|b| b.path.to_string()).collect();
        assert_eq!(paths, vec!["a/deep/st", "a/it", "top"]);
        assert_eq!(bindings[0].handler.shape(), RpcShape::ServerStreaming);
    }

    #[test]
    fn test_static_leaves_are_not_bindings() {
        struct Statics(Vec<(String, String)>);
        impl TreeVisitor for Statics {
            fn visit_leaf(&mut self, _: &CallPath, _: &Handler) -> Result<()> {
                Ok(())
            }
            fn visit_static(&mut self, path: &CallPath, value: &str) -> Result<()> {
                self.0.push((path.to_string(), value.to_string()));
                Ok(())
            }
        }

        let tree = sample_tree();
        let mut statics = Statics(Vec::new());
        tree.walk(&mut statics).unwrap();
        assert_eq!(statics.0, vec![("version".to_string(), "1.2.3".to_string())]);

        let path = CallPath::parse("version").unwrap();
        assert!(matches!(tree.resolve(&path), Some(ApiNode::Static(v)) if v == "1.2.3"));
    }

    #[tokio::test]
    async fn test_resolved_leaf_is_invocable() {
        let tree = sample_tree();
        let path = CallPath::parse("top").unwrap();
        let Some(ApiNode::Leaf(Handler::Unary(f))) = tree.resolve(&path) else {
            panic!("expected unary leaf");
        };
        let out = f(vec![Value::I32(4)]).await.unwrap();
        assert_eq!(out, Value::List(vec![Value::I32(4)]));
        assert!(tree.resolve(&CallPath::parse("a/nope").unwrap()).is_none());
    }

    struct Recorder(Mutex<Vec<(Vec<AccessFrame>, Vec<Value>)>>);

    impl CallHook for Recorder {
        type Output = String;

        fn on_call(&self, stack: &[AccessFrame], args: Vec<Value>) -> String {
            self.0.lock().unwrap().push((stack.to_vec(), args));
            path_of(stack).unwrap().to_string()
        }
    }

    #[test]
    fn test_proxy_records_access_stack() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let proxy = ApiProxy::new(recorder.clone());

        let returned = proxy.get("x").get("y").get("z").call(vec![Value::I32(1)]);
        assert_eq!(returned, "x/y/z");

        let calls = recorder.0.lock().unwrap();
        let (stack, args) = &calls[0];
        assert_eq!(
            stack,
            &vec![
                AccessFrame { owner: "".into(), key: "x".into() },
                AccessFrame { owner: "x".into(), key: "y".into() },
                AccessFrame { owner: "x/y".into(), key: "z".into() },
            ]
        );
        assert_eq!(args, &vec![Value::I32(1)]);
    }

    #[test]
    fn test_proxy_paths_are_independent() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let root = ApiProxy::new(recorder);
        let a = root.get("a");

        assert_eq!(a.get("it").path().unwrap().to_string(), "a/it");
        assert_eq!(a.get("it2").path().unwrap().to_string(), "a/it2");
        assert_eq!(root.at("a/b/c/d").path().unwrap().method_name(), "d");
        assert!(root.path().is_err());
    }
}
