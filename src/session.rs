// Session state: the loaded catalog, the cart and the logged-in card
// holder, plus the transitions every shell command performs on them.
// Nothing in here touches the console; `ui` renders the outcomes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use crate::api::{CheckoutApi, CheckoutError, Product, User};

/// Why a command could not be carried out.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error("Missing or too many arguments. Usage: {0}")]
    Arity(&'static str),
    #[error("Not logged in.")]
    NotLoggedIn,
    #[error("Your cart is empty.")]
    EmptyCart,
    #[error("Unknown product: {0}")]
    UnknownProduct(String),
}

/// Products from the last successful load, findable by id or by name.
///
/// Both indices point into the same `products` vector and are rebuilt
/// together, so they always describe the same set.
#[derive(Debug, Default)]
pub struct Catalog {
    products: Vec<Product>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        let by_id = products
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let by_name = products
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Catalog {
            products,
            by_id,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.iter()
    }

    pub fn by_id(&self, id: &str) -> Option<&Product> {
        self.by_id.get(id).and_then(|&i| self.products.get(i))
    }

    pub fn by_name(&self, name: &str) -> Option<&Product> {
        self.by_name.get(name).and_then(|&i| self.products.get(i))
    }

    /// Look up by id first, then by display name.
    pub fn resolve(&self, key: &str) -> Option<&Product> {
        self.by_id(key).or_else(|| self.by_name(key))
    }

    pub fn in_category(&self, category: &str) -> Vec<&Product> {
        self.products
            .iter()
            .filter(|p| p.category == category)
            .collect()
    }
}

/// Products queued for the next purchase, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct Cart {
    items: Vec<Product>,
}

impl Cart {
    pub fn push(&mut self, product: Product) {
        self.items.push(product);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[Product] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Exact sum of the item prices.
    pub fn total(&self) -> Decimal {
        self.items.iter().map(|p| p.price).sum()
    }
}

/// Everything the shell mutates between commands.
pub struct Session<A> {
    api: A,
    catalog: Catalog,
    cart: Cart,
    user: Option<User>,
}

impl<A: CheckoutApi> Session<A> {
    pub fn new(api: A) -> Self {
        Session {
            api,
            catalog: Catalog::default(),
            cart: Cart::default(),
            user: None,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Fetch products and replace the catalog wholesale. On failure the
    /// previous catalog stays in place.
    pub fn load_products(&mut self) -> Result<usize, CommandError> {
        let products = self.api.fetch_products()?;
        self.catalog = Catalog::new(products);
        info!(count = self.catalog.len(), "catalog replaced");
        Ok(self.catalog.len())
    }

    /// Loaded products, optionally restricted to one category.
    pub fn products(&self, category: Option<&str>) -> Vec<&Product> {
        match category {
            Some(category) => self.catalog.in_category(category),
            None => self.catalog.iter().collect(),
        }
    }

    /// Add each id-or-name to the cart. Unknown keys are reported in place
    /// and do not stop the remaining ones.
    pub fn add_items<S: AsRef<str>>(&mut self, keys: &[S]) -> Vec<Result<Product, CommandError>> {
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                match self.catalog.resolve(key) {
                    Some(product) => {
                        let product = product.clone();
                        self.cart.push(product.clone());
                        Ok(product)
                    }
                    None => Err(CommandError::UnknownProduct(key.to_string())),
                }
            })
            .collect()
    }

    pub fn clear_cart(&mut self) {
        self.cart.clear();
    }

    /// Purchase the cart for the logged-in user and return the new balance.
    ///
    /// Cart and balance are only touched once the server has accepted the
    /// transaction.
    pub fn checkout(&mut self) -> Result<Decimal, CommandError> {
        let current = self.user.as_ref().ok_or(CommandError::NotLoggedIn)?;
        if self.cart.is_empty() {
            return Err(CommandError::EmptyCart);
        }

        let mut buyer = current.clone();
        self.api.purchase(&mut buyer, self.cart.items())?;

        info!(
            user = %buyer,
            items = self.cart.len(),
            balance = %buyer.balance,
            "purchase accepted"
        );
        let balance = buyer.balance;
        self.user = Some(buyer);
        self.cart.clear();
        Ok(balance)
    }

    /// Look up a card and make its holder the active user.
    pub fn login(&mut self, card_id: &str) -> Result<&User, CommandError> {
        let user = self.api.fetch_user(card_id)?;
        info!(user = %user, "logged in");
        Ok(&*self.user.insert(user))
    }

    pub fn logout(&mut self) -> Option<User> {
        let previous = self.user.take();
        if let Some(user) = &previous {
            info!(user = %user, "logged out");
        }
        previous
    }

    /// Request a new card. Needs exactly a card id and a student id; any
    /// other argument count is rejected without contacting the server.
    pub fn register<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), CommandError> {
        let [card_id, student_id] = args else {
            return Err(CommandError::Arity("register card_id student_id"));
        };
        self.api.create_card(card_id.as_ref(), student_id.as_ref())?;
        info!(card = card_id.as_ref(), "card registration requested");
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.api.token()
    }

    pub fn set_token(&mut self, token: &str) {
        self.api.set_token(token);
    }

    pub fn server(&self) -> Option<&str> {
        self.api.server()
    }

    pub fn set_server(&mut self, server: &str) {
        self.api.set_server(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn product(id: &str, name: &str, category: &str, price: Decimal) -> Product {
        Product {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            price,
            image: None,
        }
    }

    fn alice() -> User {
        User {
            id: "1".into(),
            uuid: "card-1".into(),
            first_name: "Alice".into(),
            balance: Decimal::new(1000, 2),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        products: RefCell<Vec<Product>>,
        fail_products: Cell<bool>,
        purchase_result: RefCell<Option<Result<Decimal, u16>>>,
        purchased: RefCell<Vec<Vec<String>>>,
        calls: Cell<usize>,
        server: Option<String>,
        token: Option<String>,
    }

    impl CheckoutApi for FakeApi {
        fn server(&self) -> Option<&str> {
            self.server.as_deref()
        }
        fn set_server(&mut self, server: &str) {
            self.server = Some(server.into());
        }
        fn token(&self) -> Option<&str> {
            self.token.as_deref()
        }
        fn set_token(&mut self, token: &str) {
            self.token = Some(token.into());
        }

        fn fetch_products(&self) -> Result<Vec<Product>, CheckoutError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_products.get() {
                return Err(CheckoutError::Api {
                    status: 403,
                    body: "bad token".into(),
                });
            }
            Ok(self.products.borrow().clone())
        }

        fn fetch_user(&self, card_id: &str) -> Result<User, CheckoutError> {
            self.calls.set(self.calls.get() + 1);
            if card_id == "card-1" {
                Ok(alice())
            } else {
                Err(CheckoutError::Api {
                    status: 404,
                    body: "no such card".into(),
                })
            }
        }

        fn create_card(&self, _card_id: &str, _student_id: &str) -> Result<(), CheckoutError> {
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }

        fn purchase(&self, user: &mut User, items: &[Product]) -> Result<(), CheckoutError> {
            self.calls.set(self.calls.get() + 1);
            match self.purchase_result.borrow().clone() {
                Some(Ok(balance)) => {
                    self.purchased
                        .borrow_mut()
                        .push(items.iter().map(|p| p.id.clone()).collect());
                    user.balance = balance;
                    Ok(())
                }
                Some(Err(status)) => Err(CheckoutError::Api {
                    status,
                    body: "insufficient balance".into(),
                }),
                None => panic!("unexpected purchase"),
            }
        }
    }

    fn session_with(products: Vec<Product>) -> Session<FakeApi> {
        let api = FakeApi::default();
        *api.products.borrow_mut() = products;
        let mut session = Session::new(api);
        session.load_products().unwrap();
        session
    }

    fn snacks() -> Vec<Product> {
        vec![
            product("P001", "Cola", "drinks", Decimal::new(150, 2)),
            product("P002", "Mars", "candy", Decimal::new(225, 2)),
        ]
    }

    #[test]
    fn reload_replaces_both_indices() {
        let mut session = session_with(snacks());
        *session.api.products.borrow_mut() =
            vec![product("P009", "Tosti", "food", Decimal::new(200, 2))];

        assert_eq!(session.load_products().unwrap(), 1);
        assert!(session.catalog().by_id("P001").is_none());
        assert!(session.catalog().by_name("Cola").is_none());
        assert_eq!(session.catalog().by_id("P009").unwrap().name, "Tosti");
        assert_eq!(session.catalog().by_name("Tosti").unwrap().id, "P009");
    }

    #[test]
    fn failed_reload_keeps_previous_catalog() {
        let mut session = session_with(snacks());
        session.api.fail_products.set(true);

        assert!(matches!(
            session.load_products(),
            Err(CommandError::Checkout(CheckoutError::Api { status: 403, .. }))
        ));
        assert_eq!(session.catalog().len(), 2);
    }

    #[test]
    fn unknown_items_are_skipped_individually() {
        let mut session = session_with(snacks());
        let results = session.add_items(&["unknown1", "P001"]);

        assert!(matches!(&results[0], Err(CommandError::UnknownProduct(k)) if k == "unknown1"));
        assert_eq!(results[1].as_ref().unwrap().id, "P001");
        assert_eq!(session.cart().len(), 1);
    }

    #[test]
    fn items_resolve_by_name_and_allow_duplicates() {
        let mut session = session_with(snacks());
        session.add_items(&["Mars", "P002"]);

        assert_eq!(session.cart().len(), 2);
        assert!(session.cart().items().iter().all(|p| p.id == "P002"));
    }

    #[test]
    fn cart_total_is_exact() {
        let mut session = session_with(snacks());
        session.add_items(&["P001", "P002"]);
        assert_eq!(session.cart().total(), Decimal::new(375, 2));
        assert_eq!(session.cart().total().to_string(), "3.75");
    }

    #[test]
    fn category_results_outlive_the_filter_text() {
        let catalog = Catalog::new(snacks());
        let drinks = {
            let wanted = String::from("drinks");
            catalog.in_category(&wanted)
        };
        assert_eq!(drinks.len(), 1);
        assert_eq!(drinks[0].id, "P001");
    }

    #[test]
    fn category_filter() {
        let session = session_with(snacks());
        let candy = session.products(Some("candy"));
        assert_eq!(candy.len(), 1);
        assert_eq!(candy[0].name, "Mars");
        assert_eq!(session.products(None).len(), 2);
        assert!(session.products(Some("books")).is_empty());
    }

    #[test]
    fn checkout_requires_login_and_items() {
        let mut session = session_with(snacks());
        assert!(matches!(session.checkout(), Err(CommandError::NotLoggedIn)));

        session.login("card-1").unwrap();
        assert!(matches!(session.checkout(), Err(CommandError::EmptyCart)));
    }

    #[test]
    fn successful_checkout_clears_cart_and_takes_server_balance() {
        let mut session = session_with(snacks());
        session.login("card-1").unwrap();
        session.add_items(&["P001", "P001"]);
        *session.api.purchase_result.borrow_mut() = Some(Ok(Decimal::new(4242, 3)));

        let balance = session.checkout().unwrap();

        assert_eq!(balance, Decimal::new(4242, 3));
        assert_eq!(session.user().unwrap().balance, Decimal::new(4242, 3));
        assert!(session.cart().is_empty());
        assert_eq!(*session.api.purchased.borrow(), vec![vec!["P001", "P001"]]);
    }

    #[test]
    fn failed_checkout_keeps_cart_and_balance() {
        let mut session = session_with(snacks());
        session.login("card-1").unwrap();
        session.add_items(&["P002"]);
        *session.api.purchase_result.borrow_mut() = Some(Err(402));

        assert!(session.checkout().is_err());
        assert_eq!(session.cart().len(), 1);
        assert_eq!(session.user().unwrap().balance, Decimal::new(1000, 2));
    }

    #[test]
    fn failed_login_keeps_current_user() {
        let mut session = session_with(snacks());
        session.login("card-1").unwrap();
        assert!(session.login("nope").is_err());
        assert_eq!(session.user().unwrap().first_name, "Alice");

        assert!(session.logout().is_some());
        assert!(session.user().is_none());
    }

    #[test]
    fn register_with_wrong_arity_never_calls_api() {
        let mut session = session_with(snacks());
        let before = session.api.calls.get();

        assert!(matches!(session.register(&["only-card"]), Err(CommandError::Arity(_))));
        assert!(matches!(session.register(&["a", "b", "c"]), Err(CommandError::Arity(_))));
        let none: [&str; 0] = [];
        assert!(matches!(session.register(&none), Err(CommandError::Arity(_))));
        assert_eq!(session.api.calls.get(), before);

        session.register(&["card-9", "s123"]).unwrap();
        assert_eq!(session.api.calls.get(), before + 1);
    }
}
