use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use islands_ssr::catalog::{
    CatalogApi, CatalogSettings, Product, ProductCatalog, ProductPage, ProductQuery,
};
use islands_ssr::UpstreamError;
use pretty_assertions::assert_eq;
use serde_json::json;

#[derive(Clone, Default)]
struct CountingApi {
    calls: Arc<AtomicUsize>,
}

impl CatalogApi for CountingApi {
    fn query_products(
        &self,
        query: ProductQuery,
        _locale: String,
        _currency: String,
    ) -> BoxFuture<'static, Result<ProductPage, UpstreamError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let product: Product = serde_json::from_value(json!({
                "id": format!("p-{}", query.offset),
                "name": { "en-US": "Boot" }
            }))
            .map_err(|e| UpstreamError::new("products.search", e.to_string()))?;
            Ok(ProductPage {
                results: vec![product],
                total: 0,
                offset: 0,
                count: 0,
            })
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn identical_queries_share_a_fetch_until_ttl() {
    let api = CountingApi::default();
    let catalog = Arc::new(ProductCatalog::new(api.clone(), CatalogSettings::default()));

    let listings = join_all((0..5).map(|_| {
        let catalog = Arc::clone(&catalog);
        async move { catalog.list_products(ProductQuery::default()).await }
    }))
    .await;
    for listing in &listings {
        let listing = listing.as_ref().unwrap();
        assert_eq!(listing.products[0].name, "Boot");
        assert_eq!((listing.total, listing.offset, listing.count), (1, 0, 1));
    }
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);

    // A different page is a different key.
    let second = ProductQuery {
        offset: 20,
        ..ProductQuery::default()
    };
    let listing = catalog.list_products(second).await.unwrap();
    assert_eq!(listing.offset, 20);
    assert_eq!(api.calls.load(Ordering::SeqCst), 2);

    // No stale window: past the TTL the next read fetches again.
    tokio::time::advance(Duration::from_millis(60_001)).await;
    catalog.list_products(ProductQuery::default()).await.unwrap();
    assert_eq!(api.calls.load(Ordering::SeqCst), 3);

    catalog.clear();
    assert!(catalog.cache().is_empty());
}
