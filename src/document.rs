//! The replicated storefront document and its encodings.
//!
//! One `Document` holds the whole catalog: settings, accounts, categories,
//! products and offers, plus a few auxiliary sections that are only
//! default-filled. Every backend stores it whole; there is no field-level
//! merge anywhere.

use crate::error::{Result, StoreError};
use crate::repair::normalize_shape;
use crate::types::{Digest, EntityId, Price, Role};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Email of the reserved administrator account.
pub const ADMIN_EMAIL: &str = "admin@ph.store";

/// Id of the compiled default administrator account.
pub const DEFAULT_ADMIN_ID: &str = "admin_1";

/// Password of the compiled default administrator account.
pub const DEFAULT_ADMIN_PASSWORD: &str = "phstore.adm";

/// Site-wide configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub site_name: String,
    pub hero_title: String,
    pub hero_subtitle: String,
    pub primary_color: String,
    pub logo_url: String,
    pub logo_size: u32,
    pub instagram_link: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            site_name: String::new(),
            hero_title: "PH STORE".to_string(),
            hero_subtitle: String::new(),
            primary_color: "#e7229b".to_string(),
            logo_url: "img/logo.png".to_string(),
            logo_size: 100,
            instagram_link: String::new(),
        }
    }
}

/// Partial settings update; `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct SettingsPatch {
    pub site_name: Option<String>,
    pub hero_title: Option<String>,
    pub hero_subtitle: Option<String>,
    pub primary_color: Option<String>,
    pub logo_url: Option<String>,
    pub logo_size: Option<u32>,
    pub instagram_link: Option<String>,
}

impl SettingsPatch {
    pub(crate) fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.site_name {
            settings.site_name = v;
        }
        if let Some(v) = self.hero_title {
            settings.hero_title = v;
        }
        if let Some(v) = self.hero_subtitle {
            settings.hero_subtitle = v;
        }
        if let Some(v) = self.primary_color {
            settings.primary_color = v;
        }
        if let Some(v) = self.logo_url {
            settings.logo_url = v;
        }
        if let Some(v) = self.logo_size {
            settings.logo_size = v;
        }
        if let Some(v) = self.instagram_link {
            settings.instagram_link = v;
        }
    }
}

/// A user account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub email: String,
    /// Stored and compared in plaintext, as the storefront always has.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

impl User {
    /// The compiled default administrator.
    pub fn default_admin() -> Self {
        Self {
            id: EntityId::from(DEFAULT_ADMIN_ID),
            name: "Administrador".to_string(),
            email: ADMIN_EMAIL.to_string(),
            password: DEFAULT_ADMIN_PASSWORD.to_string(),
            role: Role::Admin,
        }
    }

    pub fn is_reserved_admin(&self) -> bool {
        self.email == ADMIN_EMAIL
    }
}

/// A product category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// Partial category update.
#[derive(Clone, Debug, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub image: Option<String>,
}

/// A catalog product.
///
/// `category_id` is expected to name an existing category but nothing
/// enforces it; a product whose category was deleted keeps the dangling id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category_id: Option<EntityId>,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub payment_link: String,
}

/// Fields for a new product (the store assigns the id).
#[derive(Clone, Debug, Default)]
pub struct NewProduct {
    pub name: String,
    pub category_id: Option<EntityId>,
    pub price: Price,
    pub description: String,
    pub image: String,
    pub payment_link: String,
}

/// Partial product update.
#[derive(Clone, Debug, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub category_id: Option<Option<EntityId>>,
    pub price: Option<Price>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub payment_link: Option<String>,
}

impl ProductPatch {
    pub(crate) fn apply(self, product: &mut Product) {
        if let Some(v) = self.name {
            product.name = v;
        }
        if let Some(v) = self.category_id {
            product.category_id = v;
        }
        if let Some(v) = self.price {
            product.price = v;
        }
        if let Some(v) = self.description {
            product.description = v;
        }
        if let Some(v) = self.image {
            product.image = v;
        }
        if let Some(v) = self.payment_link {
            product.payment_link = v;
        }
    }
}

fn default_true() -> bool {
    true
}

/// A promotional price for a product.
///
/// An offer may outlive its product; readers render it as a removed product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: EntityId,
    pub product_id: EntityId,
    #[serde(default)]
    pub promo_price: Price,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub pinned: bool,
}

/// Fields for a new offer.
#[derive(Clone, Debug)]
pub struct NewOffer {
    pub product_id: EntityId,
    pub promo_price: Price,
    pub active: bool,
    pub pinned: bool,
}

impl NewOffer {
    /// An active, unpinned offer.
    pub fn new(product_id: EntityId, promo_price: Price) -> Self {
        Self {
            product_id,
            promo_price,
            active: true,
            pinned: false,
        }
    }
}

/// Partial offer update.
#[derive(Clone, Debug, Default)]
pub struct OfferPatch {
    pub product_id: Option<EntityId>,
    pub promo_price: Option<Price>,
    pub active: Option<bool>,
    pub pinned: Option<bool>,
}

/// Aggregate counters (default-filled only).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub visits: u64,
    pub sales: u64,
    pub revenue: Decimal,
}

/// Payment key configuration (default-filled only).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
}

impl Default for PixKey {
    fn default() -> Self {
        Self {
            kind: "CPF".to_string(),
            key: String::new(),
        }
    }
}

/// The single replicated root document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(default)]
    pub orders: Vec<serde_json::Value>,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub pix_key: PixKey,
}

impl Document {
    /// The compiled default document used on a fresh backend chain.
    pub fn seed() -> Self {
        Self {
            settings: Settings::default(),
            users: vec![User::default_admin()],
            categories: Vec::new(),
            products: Vec::new(),
            offers: Vec::new(),
            orders: Vec::new(),
            stats: Stats::default(),
            pix_key: PixKey::default(),
        }
    }

    /// Decode from a JSON value, tolerating older layouts.
    pub fn from_value(mut value: serde_json::Value) -> Result<Self> {
        normalize_shape(&mut value);
        serde_json::from_value(value).map_err(|e| StoreError::CorruptDocument(e.to_string()))
    }

    /// Decode from JSON text.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptDocument(e.to_string()))?;
        Self::from_value(value)
    }

    /// Encode as compact JSON text.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a MessagePack payload written by [`Document::to_msgpack`].
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = rmp_serde::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Encode as MessagePack with named fields.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Digest of the canonical JSON encoding.
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::from_bytes(&self.to_json_vec()?))
    }

    /// Copy suitable for the minimal-footprint backup: inline `data:` images
    /// are dropped, linked images are kept.
    pub fn compact(&self) -> Self {
        fn strip(image: &mut String) {
            if image.starts_with("data:") {
                image.clear();
            }
        }

        let mut copy = self.clone();
        for category in &mut copy.categories {
            strip(&mut category.image);
        }
        for product in &mut copy.products {
            strip(&mut product.image);
        }
        if copy.settings.logo_url.starts_with("data:") {
            copy.settings.logo_url = Settings::default().logo_url;
        }
        copy
    }

    pub fn category(&self, id: &EntityId) -> Option<&Category> {
        self.categories.iter().find(|c| &c.id == id)
    }

    pub fn product(&self, id: &EntityId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }

    pub fn offer(&self, id: &EntityId) -> Option<&Offer> {
        self.offers.iter().find(|o| &o.id == id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.iter().find(|u| u.email == email)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_seed_has_reserved_admin() {
        let doc = Document::seed();
        assert_eq!(doc.users.len(), 1);
        assert_eq!(doc.users[0].email, ADMIN_EMAIL);
        assert_eq!(doc.users[0].role, Role::Admin);
        assert_eq!(doc.settings.hero_title, "PH STORE");
        assert_eq!(doc.pix_key.kind, "CPF");
    }

    #[test]
    fn test_decode_historical_layout() {
        let raw = json!({
            "settings": { "siteName": "Loja", "logoSize": 80 },
            "users": [{
                "id": "admin_1", "name": "Administrador", "email": ADMIN_EMAIL,
                "password": "phstore.adm", "role": "ADMIN"
            }],
            "categories": [{ "id": "CAT-1700000000000", "name": "Drinks", "image": "" }],
            "products": [{
                "id": "PROD-1700000000001", "name": "Cola",
                "categoryId": "CAT-1700000000000", "price": 5.0,
                "description": "", "image": "", "paymentLink": ""
            }],
            "offers": [{ "id": "OFFER-1", "productId": "PROD-1700000000001", "promoPrice": 3.5 }]
        });

        let doc = Document::from_value(raw).unwrap();
        assert_eq!(doc.settings.site_name, "Loja");
        assert_eq!(doc.settings.logo_size, 80);
        // Missing settings fields come from compiled defaults
        assert_eq!(doc.settings.primary_color, "#e7229b");
        assert_eq!(doc.products[0].price.amount(), Decimal::from_str("5").unwrap());
        assert_eq!(
            doc.products[0].category_id,
            Some(EntityId::from("CAT-1700000000000"))
        );
        assert!(doc.offers[0].active);
        assert!(!doc.offers[0].pinned);
        assert!(doc.orders.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = Document::from_json_slice(b"{not json");
        assert!(matches!(result, Err(StoreError::CorruptDocument(_))));
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let mut doc = Document::seed();
        doc.products.push(Product {
            id: EntityId::generate("PROD"),
            name: "Cola".to_string(),
            category_id: None,
            price: Price::from_cents(500),
            description: String::new(),
            image: String::new(),
            payment_link: String::new(),
        });

        let bytes = doc.to_msgpack().unwrap();
        assert_eq!(Document::from_msgpack(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_compact_drops_inline_images() {
        let mut doc = Document::seed();
        doc.categories.push(Category {
            id: EntityId::from("CAT-1"),
            name: "Inline".to_string(),
            image: "data:image/png;base64,AAAA".to_string(),
        });
        doc.categories.push(Category {
            id: EntityId::from("CAT-2"),
            name: "Linked".to_string(),
            image: "img/cat.png".to_string(),
        });

        let compact = doc.compact();
        assert_eq!(compact.categories[0].image, "");
        assert_eq!(compact.categories[1].image, "img/cat.png");
        // Original untouched
        assert!(doc.categories[0].image.starts_with("data:"));
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = Document::seed();
        let mut b = Document::seed();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        b.settings.site_name = "Changed".to_string();
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }
}
