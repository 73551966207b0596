//! Route loader and head composition.
//!
//! Routing itself lives outside this crate. A [`Router`] hands back a
//! [`RouteMatch`]; this module runs its loaders and head functions and
//! wraps the rendered page in the document shell.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::document::{render_document, render_error_document, DocumentParts};
use crate::island::Markup;
use crate::manifest::ManifestProvider;
use crate::BoxError;

/// Page props accumulated from loaders.
pub type Props = Map<String, Value>;

/// Attributes of a single `<meta>` or `<link>` tag.
pub type TagAttrs = IndexMap<String, String>;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Loader failed for {path}: {source}")]
    Loader {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Head failed for {path}: {source}")]
    Head {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Render failed for {path}: {source}")]
    Render {
        path: String,
        #[source]
        source: BoxError,
    },
}

/// What loaders and head functions see of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderContext {
    pub path: String,
    pub params: IndexMap<String, String>,
}

// ---------------------------------------------------------------------------
// Head
// ---------------------------------------------------------------------------

/// Document head contributed by a route module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub meta: Vec<TagAttrs>,
    #[serde(default)]
    pub links: Vec<TagAttrs>,
}

impl Head {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Fold `next` into `self`: a non-empty title wins, tags append.
    pub fn merge(&mut self, next: Head) {
        if let Some(title) = next.title.filter(|t| !t.is_empty()) {
            self.title = Some(title);
        }
        self.meta.extend(next.meta);
        self.links.extend(next.links);
    }
}

// ---------------------------------------------------------------------------
// Route modules
// ---------------------------------------------------------------------------

/// Produces props for a route. Non-object results are ignored.
pub trait Loader: Send + Sync {
    fn load(&self, ctx: LoaderContext) -> BoxFuture<'static, Result<Value, BoxError>>;
}

impl<F, Fut> Loader for F
where
    F: Fn(LoaderContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    fn load(&self, ctx: LoaderContext) -> BoxFuture<'static, Result<Value, BoxError>> {
        self(ctx).boxed()
    }
}

/// Produces head metadata from the final props.
pub trait HeadFn: Send + Sync {
    fn head(&self, props: Props, ctx: LoaderContext) -> BoxFuture<'static, Result<Head, BoxError>>;
}

impl<F, Fut> HeadFn for F
where
    F: Fn(Props, LoaderContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Head, BoxError>> + Send + 'static,
{
    fn head(&self, props: Props, ctx: LoaderContext) -> BoxFuture<'static, Result<Head, BoxError>> {
        self(props, ctx).boxed()
    }
}

/// A page or layout: an opaque component plus optional loader and head.
pub struct RouteModule<C> {
    pub component: C,
    pub loader: Option<Arc<dyn Loader>>,
    pub head: Option<Arc<dyn HeadFn>>,
}

impl<C> RouteModule<C> {
    pub fn new(component: C) -> Self {
        Self {
            component,
            loader: None,
            head: None,
        }
    }

    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn with_head(mut self, head: impl HeadFn + 'static) -> Self {
        self.head = Some(Arc::new(head));
        self
    }
}

/// A resolved route. `layouts` is ordered outermost first.
pub struct RouteMatch<'a, C> {
    pub params: IndexMap<String, String>,
    pub page: &'a RouteModule<C>,
    pub layouts: Vec<&'a RouteModule<C>>,
}

impl<'a, C> RouteMatch<'a, C> {
    /// Layouts then page, outer to inner.
    fn modules(&self) -> impl Iterator<Item = &'a RouteModule<C>> + '_ {
        self.layouts.iter().copied().chain(std::iter::once(self.page))
    }
}

pub trait Router<C>: Send + Sync {
    fn match_path(&self, path: &str) -> Option<RouteMatch<'_, C>>;
}

/// Renders a matched page inside its layouts. Supplied by the UI library.
pub trait PageRenderer<C>: Send + Sync {
    fn render(&self, route: &RouteMatch<'_, C>, props: &Props) -> Result<Markup, BoxError>;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Props and merged head for a matched route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRoute {
    pub props: Props,
    pub head: Head,
}

/// Run every loader outer to inner, then every head function in the same
/// order against the final props.
pub async fn load_route<C>(
    route: &RouteMatch<'_, C>,
    ctx: &LoaderContext,
) -> Result<LoadedRoute, RouteError> {
    let mut props = Props::new();
    for module in route.modules() {
        let Some(loader) = &module.loader else {
            continue;
        };
        let value = loader
            .load(ctx.clone())
            .await
            .map_err(|source| RouteError::Loader {
                path: ctx.path.clone(),
                source,
            })?;
        match value {
            Value::Object(added) => props.extend(added),
            Value::Null => {}
            other => debug!(
                path = %ctx.path,
                kind = json_kind(&other),
                "Ignoring non-object loader result"
            ),
        }
    }

    let mut head = Head::default();
    for module in route.modules() {
        let Some(head_fn) = &module.head else {
            continue;
        };
        let next = head_fn
            .head(props.clone(), ctx.clone())
            .await
            .map_err(|source| RouteError::Head {
                path: ctx.path.clone(),
                source,
            })?;
        head.merge(next);
    }

    Ok(LoadedRoute { props, head })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A complete HTTP response for a page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl RenderedResponse {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }
}

/// Match, load, render and wrap a page.
///
/// No match is a 404. Loader, head or render failures are logged and become
/// a 500 with a generic error page.
pub async fn render_request<C, R, P>(
    router: &R,
    renderer: &P,
    manifest: &ManifestProvider,
    path: &str,
) -> RenderedResponse
where
    R: Router<C> + ?Sized,
    P: PageRenderer<C> + ?Sized,
{
    let Some(route) = router.match_path(path) else {
        debug!(path, "No route matched");
        return RenderedResponse {
            status: 404,
            content_type: "text/plain; charset=utf-8",
            body: "Not Found".into(),
        };
    };

    let ctx = LoaderContext {
        path: path.to_string(),
        params: route.params.clone(),
    };

    let result = async {
        let loaded = load_route(&route, &ctx).await?;
        let body = renderer
            .render(&route, &loaded.props)
            .map_err(|source| RouteError::Render {
                path: path.to_string(),
                source,
            })?;
        Ok::<_, RouteError>((loaded.head, body))
    }
    .await;

    match result {
        Ok((head, body)) => {
            let html = render_document(&DocumentParts {
                head: &head,
                body: &body,
                manifest,
                modulepreload: &[],
            });
            RenderedResponse::html(200, html)
        }
        Err(err) => {
            error!(path, error = %err, "Page render failed");
            RenderedResponse::html(500, render_error_document())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> TagAttrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn head_merge_rules() {
        let mut head = Head::titled("Shop");
        head.meta.push(attrs(&[("name", "a")]));

        head.merge(Head {
            title: Some(String::new()),
            meta: vec![attrs(&[("name", "b")])],
            links: vec![attrs(&[("rel", "canonical")])],
        });
        assert_eq!(head.title.as_deref(), Some("Shop"));

        head.merge(Head::titled("Cart"));
        assert_eq!(head.title.as_deref(), Some("Cart"));
        assert_eq!(head.meta.len(), 2);
        assert_eq!(head.links.len(), 1);
    }

    #[tokio::test]
    async fn loaders_merge_outer_to_inner() {
        let layout = RouteModule::new("layout")
            .with_loader(|_ctx: LoaderContext| async {
                Ok::<_, BoxError>(json!({"user": "ann", "section": "root"}))
            })
            .with_head(|props: Props, _ctx: LoaderContext| async move {
                let section = props["section"].as_str().unwrap_or_default().to_string();
                Ok::<_, BoxError>(Head::titled(format!("Layout {section}")))
            });
        let page = RouteModule::new("page")
            .with_loader(|ctx: LoaderContext| async move {
                Ok::<_, BoxError>(json!({"section": "products", "id": ctx.params["id"]}))
            })
            .with_head(|_props: Props, _ctx: LoaderContext| async {
                Ok::<_, BoxError>(Head::default())
            });
        let ignored = RouteModule::new("ignored")
            .with_loader(|_ctx: LoaderContext| async { Ok::<_, BoxError>(json!([1, 2])) });

        let route = RouteMatch {
            params: IndexMap::from([("id".to_string(), "42".to_string())]),
            page: &page,
            layouts: vec![&layout, &ignored],
        };
        let ctx = LoaderContext {
            path: "/products/42".into(),
            params: route.params.clone(),
        };

        let loaded = load_route(&route, &ctx).await.unwrap();
        assert_eq!(
            Value::Object(loaded.props),
            json!({"user": "ann", "section": "products", "id": "42"})
        );
        // Heads run after every loader, so the layout sees the page's props.
        assert_eq!(loaded.head.title.as_deref(), Some("Layout products"));
    }

    #[tokio::test]
    async fn loader_error_is_reported() {
        let page = RouteModule::new(()).with_loader(|_ctx: LoaderContext| async {
            Err::<Value, BoxError>("upstream down".into())
        });
        let route = RouteMatch {
            params: IndexMap::new(),
            page: &page,
            layouts: vec![],
        };
        let err = load_route(&route, &LoaderContext::default()).await.unwrap_err();
        assert!(matches!(err, RouteError::Loader { .. }));
        assert!(err.to_string().contains("upstream down"));
    }
}
