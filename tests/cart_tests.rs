use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use islands_ssr::cart::{
    Cart, CartAction, CartApi, CartDraft, CartError, CartQuery, CartService, CartSettings, LineItem,
    Price,
};
use islands_ssr::{CacheLookup, UpstreamError};
use indexmap::IndexMap;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

const UNIT_CENTS: i64 = 1000;

#[derive(Default)]
struct Store {
    carts: HashMap<String, Cart>,
    next_id: usize,
}

#[derive(Default, Clone)]
struct FakeCartApi {
    store: Arc<Mutex<Store>>,
    gets: Arc<AtomicUsize>,
    /// When set, the next update waits for this before answering.
    update_gate: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

fn usd(cents: i64) -> Price {
    Price {
        cent_amount: cents,
        currency_code: "USD".into(),
    }
}

fn empty_cart(id: &str, customer_id: Option<String>) -> Cart {
    Cart {
        id: id.to_string(),
        version: 1,
        line_items: Vec::new(),
        total_price: usd(0),
        customer_id,
    }
}

impl FakeCartApi {
    fn with_cart(cart: Cart) -> Self {
        let api = Self::default();
        api.store.lock().carts.insert(cart.id.clone(), cart);
        api
    }

    fn stored(&self, id: &str) -> Option<Cart> {
        self.store.lock().carts.get(id).cloned()
    }
}

fn apply(cart: &mut Cart, action: CartAction) {
    match action {
        CartAction::AddLineItem {
            product_id,
            quantity,
            ..
        } => {
            let mut name = IndexMap::new();
            name.insert("en-US".to_string(), format!("Product {product_id}"));
            cart.line_items.push(LineItem {
                id: format!("li-{}", cart.line_items.len() + 1),
                product_id,
                name,
                sku: None,
                image_url: None,
                quantity,
                price_per_unit: UNIT_CENTS,
                total_price: usd(UNIT_CENTS * i64::from(quantity)),
            });
        }
        CartAction::ChangeLineItemQuantity {
            line_item_id,
            quantity,
        } => {
            if let Some(item) = cart.line_items.iter_mut().find(|li| li.id == line_item_id) {
                item.quantity = quantity;
                item.total_price = usd(UNIT_CENTS * i64::from(quantity));
            }
        }
        CartAction::RemoveLineItem { line_item_id } => {
            cart.line_items.retain(|li| li.id != line_item_id);
        }
        CartAction::SetCustomerId { customer_id } => cart.customer_id = Some(customer_id),
    }
    cart.total_price = usd(cart.line_items.iter().map(|li| li.total_price.cent_amount).sum());
}

impl CartApi for FakeCartApi {
    fn get_cart(&self, id: &str) -> BoxFuture<'static, Result<Option<Cart>, UpstreamError>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let cart = self.stored(id);
        async move { Ok(cart) }.boxed()
    }

    fn create_cart(&self, draft: CartDraft) -> BoxFuture<'static, Result<Cart, UpstreamError>> {
        let mut store = self.store.lock();
        store.next_id += 1;
        let cart = empty_cart(&format!("new-{}", store.next_id), draft.customer_id);
        store.carts.insert(cart.id.clone(), cart.clone());
        async move { Ok(cart) }.boxed()
    }

    fn update_cart(
        &self,
        id: &str,
        version: u64,
        actions: Vec<CartAction>,
    ) -> BoxFuture<'static, Result<Cart, UpstreamError>> {
        let gate = self.update_gate.lock().take();
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            let mut store = store.lock();
            let cart = store
                .carts
                .get_mut(&id)
                .ok_or_else(|| UpstreamError::new("updateCart", "not found").with_status(404))?;
            if cart.version != version {
                return Err(UpstreamError::new("updateCart", "version conflict").with_status(409));
            }
            for action in actions {
                apply(cart, action);
            }
            cart.version += 1;
            Ok(cart.clone())
        }
        .boxed()
    }
}

fn service(api: FakeCartApi) -> CartService<FakeCartApi> {
    CartService::new(api, CartSettings::default())
}

#[tokio::test]
async fn view_is_cached_by_cart_id() {
    let api = FakeCartApi::with_cart(empty_cart("c-1", None));
    let carts = service(api.clone());

    let first = carts.get_cart_view(CartQuery::by_id("c-1")).await.unwrap();
    let second = carts.get_cart_view(CartQuery::by_id("c-1")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total.display, "$0.00");
    assert_eq!(api.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn add_then_change_then_remove() {
    let api = FakeCartApi::with_cart(empty_cart("c-1", None));
    let carts = service(api.clone());

    let view = carts.add_line_item(Some("c-1"), "p-9", 1, 2).await.unwrap();
    assert_eq!(view.version, 2);
    assert_eq!(view.total_qty, 2);
    assert_eq!(view.items[0].name, "Product p-9");
    assert_eq!(view.total.display, "$20.00");

    let view = carts.set_line_item_quantity(Some("c-1"), "li-1", 5).await.unwrap();
    assert_eq!(view.total_qty, 5);

    let view = carts.set_line_item_quantity(Some("c-1"), "li-1", 0).await.unwrap();
    assert!(view.items.is_empty());
    assert_eq!(view.version, 4);

    // Reads after a mutation see the written view without an upstream call.
    let gets_before = api.gets.load(Ordering::SeqCst);
    let cached = carts.get_cart_view(CartQuery::by_id("c-1")).await.unwrap();
    assert_eq!(cached, view);
    assert_eq!(api.gets.load(Ordering::SeqCst), gets_before);
}

#[tokio::test]
async fn mutation_invalidates_before_upstream_write() {
    let api = FakeCartApi::with_cart(empty_cart("c-1", None));
    let carts = service(api.clone());
    carts.get_cart_view(CartQuery::by_id("c-1")).await.unwrap();
    assert!(matches!(carts.cache().read("c-1"), CacheLookup::Fresh(_)));

    let (release, gate) = oneshot::channel();
    *api.update_gate.lock() = Some(gate);

    let pending = {
        let carts = carts.clone();
        tokio::spawn(async move { carts.add_line_item(Some("c-1"), "p-1", 1, 1).await })
    };

    while api.gets.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(carts.cache().read("c-1"), CacheLookup::Miss);

    release.send(()).unwrap();
    let view = pending.await.unwrap().unwrap();
    assert_eq!(carts.cache().read("c-1"), CacheLookup::Fresh(view));
}

#[tokio::test]
async fn mutations_require_a_cart_id() {
    let carts = service(FakeCartApi::default());
    assert_eq!(
        carts.add_line_item(None, "p", 1, 1).await,
        Err(CartError::MissingCartId)
    );
    assert_eq!(
        carts.set_line_item_quantity(Some(""), "li", 1).await,
        Err(CartError::MissingCartId)
    );
    assert_eq!(
        carts.merge_cart_to_customer(None, "cust").await,
        Err(CartError::MissingCartId)
    );
}

#[tokio::test]
async fn mutating_unknown_cart_is_not_found() {
    let carts = service(FakeCartApi::default());
    assert_eq!(
        carts.add_line_item(Some("ghost"), "p", 1, 1).await,
        Err(CartError::NotFound("ghost".into()))
    );
}

#[tokio::test]
async fn unknown_id_is_replaced_and_cached_under_new_id() {
    let api = FakeCartApi::default();
    let carts = service(api.clone());

    let view = carts.get_cart_view(CartQuery::by_id("expired")).await.unwrap();
    assert_eq!(view.id, "new-1");
    assert!(api.stored("new-1").is_some());
    assert_eq!(carts.cache().read("expired"), CacheLookup::Miss);
    assert_eq!(carts.cache().read("new-1").value(), Some(view));

    // The old id never serves the cart from before a mutation.
    let added = carts.add_line_item(Some("new-1"), "p-1", 1, 2).await.unwrap();
    assert_eq!(added.total_qty, 2);
    assert_eq!(carts.cache().read("expired"), CacheLookup::Miss);
    let current = carts.get_cart_view(CartQuery::by_id("new-1")).await.unwrap();
    assert_eq!(current, added);
}

#[tokio::test]
async fn merge_without_customer_is_a_no_op() {
    let api = FakeCartApi::with_cart(empty_cart("c-1", None));
    let carts = service(api.clone());

    assert_eq!(carts.merge_cart_to_customer(Some("c-1"), "").await, Ok(None));
    assert_eq!(api.stored("c-1").unwrap().version, 1);
    assert_eq!(api.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn no_id_creates_a_cart() {
    let api = FakeCartApi::default();
    let carts = service(api.clone());

    let query = CartQuery {
        customer_id: Some("cust-1".into()),
        ..CartQuery::default()
    };
    let view = carts.get_cart_view(query).await.unwrap();
    assert_eq!(api.stored(&view.id).unwrap().customer_id.as_deref(), Some("cust-1"));
    assert_eq!(carts.cache().keys(), vec![view.id]);
}

#[tokio::test]
async fn merge_assigns_customer_once() {
    let api = FakeCartApi::with_cart(empty_cart("c-1", None));
    let carts = service(api.clone());

    let merged = carts.merge_cart_to_customer(Some("c-1"), "cust-1").await.unwrap().unwrap();
    assert_eq!(merged.version, 2);
    assert_eq!(api.stored("c-1").unwrap().customer_id.as_deref(), Some("cust-1"));

    // Already owned: no second update.
    let again = carts.merge_cart_to_customer(Some("c-1"), "cust-1").await.unwrap().unwrap();
    assert_eq!(again.version, 2);

    assert_eq!(carts.merge_cart_to_customer(Some("ghost"), "cust-1").await, Ok(None));
}

#[tokio::test]
async fn upstream_errors_surface() {
    struct Failing;

    impl CartApi for Failing {
        fn get_cart(&self, _id: &str) -> BoxFuture<'static, Result<Option<Cart>, UpstreamError>> {
            async { Err(UpstreamError::new("getCart", "boom").with_status(503)) }.boxed()
        }
        fn create_cart(
            &self,
            _draft: CartDraft,
        ) -> BoxFuture<'static, Result<Cart, UpstreamError>> {
            async { Err(UpstreamError::new("createCart", "boom")) }.boxed()
        }
        fn update_cart(
            &self,
            _id: &str,
            _version: u64,
            _actions: Vec<CartAction>,
        ) -> BoxFuture<'static, Result<Cart, UpstreamError>> {
            async { Err(UpstreamError::new("updateCart", "boom")) }.boxed()
        }
    }

    let carts = CartService::new(Failing, CartSettings::default());
    let err = carts.get_cart_view(CartQuery::by_id("c-1")).await.unwrap_err();
    assert!(matches!(err, CartError::Upstream(ref e) if e.status == Some(503)));
    assert!(carts.cache().is_empty());
}
