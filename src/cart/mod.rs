//! Cart views through the SWR cache.
//!
//! Reads go through [`SwrCache::read_through`] keyed by cart id. Every
//! mutation invalidates the key before talking to the upstream, so no reader
//! can be served the pre-mutation view while the write is in progress, and
//! writes the fresh view back once the upstream answers.

pub mod model;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CacheConfig, SwrCache};
use crate::UpstreamError;

pub use model::{Cart, CartAction, CartDraft, CartItemView, CartView, LineItem, Money, Price};

/// Default currency for new carts.
pub const DEFAULT_CURRENCY: &str = "USD";
/// Default locale for item names.
pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("cartId is required")]
    MissingCartId,

    #[error("Cart not found for id {0}")]
    NotFound(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<Arc<CartError>> for CartError {
    fn from(err: Arc<CartError>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// The commerce SDK boundary.
///
/// `get_cart` maps a 404 to `Ok(None)`. `update_cart` is version-checked
/// upstream.
pub trait CartApi: Send + Sync + 'static {
    fn get_cart(&self, id: &str) -> BoxFuture<'static, Result<Option<Cart>, UpstreamError>>;

    fn create_cart(&self, draft: CartDraft) -> BoxFuture<'static, Result<Cart, UpstreamError>>;

    fn update_cart(
        &self,
        id: &str,
        version: u64,
        actions: Vec<CartAction>,
    ) -> BoxFuture<'static, Result<Cart, UpstreamError>>;
}

/// Options for [`CartService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSettings {
    pub cache: CacheConfig,
    pub currency: String,
    pub locale: String,
}

impl Default for CartSettings {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            currency: DEFAULT_CURRENCY.to_string(),
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

impl CartSettings {
    /// `CART_CACHE_TTL_MS`, `CART_CACHE_SWR_MS`, `CART_CACHE_MAX_ENTRIES`,
    /// `CART_CURRENCY` and `DEFAULT_LOCALE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            cache: CacheConfig::from_lookup("CART_CACHE", defaults.cache, &lookup),
            currency: non_empty("CART_CURRENCY").unwrap_or(defaults.currency),
            locale: non_empty("DEFAULT_LOCALE").unwrap_or(defaults.locale),
        }
    }
}

/// Who is asking for a cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartQuery {
    pub cart_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub customer_id: Option<String>,
}

impl CartQuery {
    pub fn by_id(cart_id: impl Into<String>) -> Self {
        Self {
            cart_id: Some(cart_id.into()),
            ..Self::default()
        }
    }
}

pub struct CartService<A> {
    api: Arc<A>,
    cache: SwrCache<CartView, CartError>,
    settings: CartSettings,
}

impl<A> Clone for CartService<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            cache: self.cache.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<A: CartApi> CartService<A> {
    pub fn new(api: A, settings: CartSettings) -> Self {
        Self {
            api: Arc::new(api),
            cache: SwrCache::new(settings.cache),
            settings,
        }
    }

    pub fn cache(&self) -> &SwrCache<CartView, CartError> {
        &self.cache
    }

    /// Current view of the caller's cart, creating one when needed.
    ///
    /// With an id the view is served stale-while-revalidate. An id the
    /// upstream no longer knows is replaced by a new cart, cached under the
    /// new id only. Without an id a new cart is created and cached.
    pub async fn get_cart_view(&self, query: CartQuery) -> Result<CartView, CartError> {
        let draft = self.draft(&query);

        let Some(cart_id) = query.cart_id.filter(|id| !id.is_empty()) else {
            let locale = self.settings.locale.clone();
            let view = fetch_view(Arc::clone(&self.api), None, draft, locale).await?;
            info!(cart_id = %view.id, "Created cart");
            self.cache.write(&view.id, view.clone());
            return Ok(view);
        };

        let api = Arc::clone(&self.api);
        let locale = self.settings.locale.clone();
        let fetch_id = cart_id.clone();
        let view = self
            .cache
            .read_through(&cart_id, move || fetch_view(api, Some(fetch_id), draft, locale))
            .await?;

        if view.id != cart_id {
            debug!(requested = %cart_id, replacement = %view.id, "Cart was replaced");
            // Mutations only refresh the new id.
            self.cache.invalidate(&cart_id);
            if self.cache.read(&view.id).value().is_none() {
                self.cache.write(&view.id, view.clone());
            }
        }
        Ok(view)
    }

    pub async fn add_line_item(
        &self,
        cart_id: Option<&str>,
        product_id: &str,
        variant_id: u32,
        quantity: u32,
    ) -> Result<CartView, CartError> {
        let action = CartAction::AddLineItem {
            product_id: product_id.to_string(),
            variant_id,
            quantity,
        };
        self.mutate(cart_id, vec![action]).await
    }

    /// Change a line item's quantity. Zero or less removes it.
    pub async fn set_line_item_quantity(
        &self,
        cart_id: Option<&str>,
        line_item_id: &str,
        quantity: i64,
    ) -> Result<CartView, CartError> {
        let line_item_id = line_item_id.to_string();
        let action = if quantity <= 0 {
            CartAction::RemoveLineItem { line_item_id }
        } else {
            CartAction::ChangeLineItemQuantity {
                line_item_id,
                quantity: u32::try_from(quantity).unwrap_or(u32::MAX),
            }
        };
        self.mutate(cart_id, vec![action]).await
    }

    /// Attach an anonymous cart to a customer after login.
    ///
    /// `Ok(None)` when the cart does not exist or no customer id is given. A
    /// cart the customer already owns is returned unchanged.
    pub async fn merge_cart_to_customer(
        &self,
        cart_id: Option<&str>,
        customer_id: &str,
    ) -> Result<Option<CartView>, CartError> {
        let cart_id = require_cart_id(cart_id)?;
        if customer_id.is_empty() {
            return Ok(None);
        }
        self.cache.invalidate(cart_id);

        let Some(cart) = self.api.get_cart(cart_id).await? else {
            return Ok(None);
        };
        if cart.customer_id.as_deref() == Some(customer_id) {
            return Ok(Some(CartView::from_cart(&cart, &self.settings.locale)));
        }

        let updated = self
            .api
            .update_cart(
                cart_id,
                cart.version,
                vec![CartAction::SetCustomerId {
                    customer_id: customer_id.to_string(),
                }],
            )
            .await?;
        let view = CartView::from_cart(&updated, &self.settings.locale);
        info!(cart_id = %view.id, "Merged cart to customer");
        self.cache.write(&view.id, view.clone());
        Ok(Some(view))
    }

    /// Invalidate, read the current version, submit actions, cache the result.
    async fn mutate(
        &self,
        cart_id: Option<&str>,
        actions: Vec<CartAction>,
    ) -> Result<CartView, CartError> {
        let cart_id = require_cart_id(cart_id)?;
        self.cache.invalidate(cart_id);

        let cart = self
            .api
            .get_cart(cart_id)
            .await?
            .ok_or_else(|| CartError::NotFound(cart_id.to_string()))?;

        debug!(cart_id, version = cart.version, actions = actions.len(), "Updating cart");
        let updated = self.api.update_cart(cart_id, cart.version, actions).await?;

        let view = CartView::from_cart(&updated, &self.settings.locale);
        self.cache.write(&view.id, view.clone());
        Ok(view)
    }

    fn draft(&self, query: &CartQuery) -> CartDraft {
        CartDraft {
            currency: self.settings.currency.clone(),
            anonymous_id: query.anonymous_id.clone(),
            customer_id: query.customer_id.clone(),
        }
    }
}

fn require_cart_id(cart_id: Option<&str>) -> Result<&str, CartError> {
    cart_id
        .filter(|id| !id.is_empty())
        .ok_or(CartError::MissingCartId)
}

/// Load (or create) a cart and flatten it.
async fn fetch_view<A: CartApi>(
    api: Arc<A>,
    cart_id: Option<String>,
    draft: CartDraft,
    locale: String,
) -> Result<CartView, CartError> {
    if let Some(id) = cart_id {
        if let Some(cart) = api.get_cart(&id).await? {
            return Ok(CartView::from_cart(&cart, &locale));
        }
        debug!(cart_id = %id, "Cart not found upstream, creating a new one");
    }

    let cart = api.create_cart(draft).await?;
    Ok(CartView::from_cart(&cart, &locale))
}
