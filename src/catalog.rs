//! Product listings behind a plain TTL cache with single-flight fetches.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheConfig, SwrCache};
use crate::cart::model::{display_cents, Money, Price};
use crate::UpstreamError;

/// Locale code to text, in upstream order.
pub type LocalizedString = IndexMap<String, String>;

pub const DEFAULT_LIMIT: u32 = 20;
pub const UNNAMED_PRODUCT: &str = "Unnamed product";

/// The value for `locale`, else the first value present.
pub fn pick_localized<'a>(localized: &'a LocalizedString, locale: &str) -> Option<&'a str> {
    localized
        .get(locale)
        .filter(|v| !v.is_empty())
        .or_else(|| localized.values().next())
        .map(String::as_str)
}

// ---------------------------------------------------------------------------
// Upstream records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub prices: Vec<Price>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: LocalizedString,
    #[serde(default)]
    pub slug: LocalizedString,
    #[serde(default)]
    pub description: LocalizedString,
    #[serde(default)]
    pub master_variant: Option<Variant>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// One page of upstream results. Zero counts mean "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPage {
    pub results: Vec<Product>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub count: u32,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: String,
    pub sku: Option<String>,
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub price: Money,
    pub categories: Vec<String>,
}

impl ProductView {
    /// Flatten a product, preferring a price in `currency`.
    pub fn from_product(product: &Product, locale: &str, currency: &str) -> Self {
        let variant = product.master_variant.as_ref();
        let prices = variant.map(|v| v.prices.as_slice()).unwrap_or_default();
        let price = prices
            .iter()
            .find(|p| p.currency_code == currency)
            .or_else(|| prices.first());
        let images = variant.map(|v| v.images.clone()).unwrap_or_default();

        let price = match price {
            Some(p) => Money::from(p),
            None => Money {
                cent_amount: 0,
                currency_code: currency.to_string(),
                display: display_cents(0),
            },
        };

        Self {
            id: product.id.clone(),
            sku: variant.and_then(|v| v.sku.clone()),
            name: pick_localized(&product.name, locale)
                .unwrap_or(UNNAMED_PRODUCT)
                .to_string(),
            slug: pick_localized(&product.slug, locale).map(str::to_string),
            description: pick_localized(&product.description, locale).map(str::to_string),
            image_url: images.first().cloned(),
            images,
            price,
            categories: product.categories.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListing {
    pub products: Vec<ProductView>,
    pub total: u64,
    pub offset: u32,
    pub count: u32,
}

/// Arguments of [`ProductCatalog::list_products`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    pub limit: u32,
    pub offset: u32,
    pub category_id: Option<String>,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            category_id: None,
        }
    }
}

impl ProductQuery {
    pub fn cache_key(&self) -> String {
        format!(
            "limit={}&offset={}&category={}",
            self.limit,
            self.offset,
            self.category_id.as_deref().filter(|c| !c.is_empty()).unwrap_or("all")
        )
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The product search SDK boundary.
pub trait CatalogApi: Send + Sync + 'static {
    fn query_products(
        &self,
        query: ProductQuery,
        locale: String,
        currency: String,
    ) -> BoxFuture<'static, Result<ProductPage, UpstreamError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub cache: CacheConfig,
    pub locale: String,
    pub currency: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            cache: CacheConfig::ttl_only(Duration::from_millis(60_000), 50),
            locale: crate::cart::DEFAULT_LOCALE.to_string(),
            currency: crate::cart::DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl CatalogSettings {
    /// `PRODUCTS_CACHE_TTL_MS`, `PRODUCTS_CACHE_MAX_ENTRIES`, `CART_CURRENCY`
    /// and `DEFAULT_LOCALE`. The stale window is always zero.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut cache = CacheConfig::from_lookup("PRODUCTS_CACHE", defaults.cache, &lookup);
        cache.stale_while_revalidate = Duration::ZERO;
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            cache,
            locale: non_empty("DEFAULT_LOCALE").unwrap_or(defaults.locale),
            currency: non_empty("CART_CURRENCY").unwrap_or(defaults.currency),
        }
    }
}

pub struct ProductCatalog<A> {
    api: Arc<A>,
    cache: SwrCache<ProductListing, UpstreamError>,
    settings: CatalogSettings,
}

impl<A: CatalogApi> ProductCatalog<A> {
    pub fn new(api: A, settings: CatalogSettings) -> Self {
        Self {
            api: Arc::new(api),
            cache: SwrCache::new(settings.cache),
            settings,
        }
    }

    /// One page of products. Concurrent identical queries share one fetch.
    pub async fn list_products(
        &self,
        query: ProductQuery,
    ) -> Result<ProductListing, UpstreamError> {
        let key = query.cache_key();
        let api = Arc::clone(&self.api);
        let locale = self.settings.locale.clone();
        let currency = self.settings.currency.clone();

        self.cache
            .read_through(&key, move || async move {
                let requested_offset = query.offset;
                let page = api
                    .query_products(query, locale.clone(), currency.clone())
                    .await?;
                debug!(results = page.results.len(), "Fetched product page");
                let listing = listing_from_page(&page, requested_offset, &locale, &currency);
                Ok::<_, UpstreamError>(listing)
            })
            .await
            .map_err(|err| (*err).clone())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &SwrCache<ProductListing, UpstreamError> {
        &self.cache
    }
}

fn listing_from_page(
    page: &ProductPage,
    requested_offset: u32,
    locale: &str,
    currency: &str,
) -> ProductListing {
    let products: Vec<ProductView> = page
        .results
        .iter()
        .map(|p| ProductView::from_product(p, locale, currency))
        .collect();
    let returned = products.len();

    ProductListing {
        total: if page.total > 0 { page.total } else { returned as u64 },
        offset: if page.offset > 0 { page.offset } else { requested_offset },
        count: if page.count > 0 { page.count } else { returned as u32 },
        products,
    }
}
