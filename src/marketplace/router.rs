use crate::models::{Marketplace, ObjectType};

pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Marketplace and search URL template for one object category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub marketplace: Marketplace,
    pub template: &'static str,
}

impl Route {
    /// Substitutes an already percent-encoded query into the template.
    pub fn render(&self, encoded_query: &str) -> String {
        self.template.replacen(QUERY_PLACEHOLDER, encoded_query, 1)
    }
}

const ABEBOOKS: Route = Route {
    marketplace: Marketplace::Abebooks,
    template: "https://www.abebooks.fr/servlet/SearchResults?kn={query}&sts=t",
};

const VINTED: Route = Route {
    marketplace: Marketplace::Vinted,
    template: "https://www.vinted.fr/catalog?search_text={query}",
};

pub const DEFAULT_ROUTE: Route = Route {
    marketplace: Marketplace::Leboncoin,
    template: "https://www.leboncoin.fr/recherche?text={query}",
};

pub fn route(object_type: ObjectType) -> Route {
    match object_type {
        ObjectType::Book => ABEBOOKS,
        ObjectType::Clothing => VINTED,
        // electronics, furniture, tools, general and anything added later
        _ => DEFAULT_ROUTE,
    }
}
