use crate::marketplace::router::{self, Route};
use crate::models::{AnalysisResult, MarketplaceLink, ObjectType, SearchQuery};
use tracing::{debug, info};

pub const MAX_LINKS: usize = 5;

/// Candidate links for an analysis, one per search query, in query order.
pub fn build(analysis: &AnalysisResult) -> Vec<MarketplaceLink> {
    build_links(analysis.object_type(), analysis.search_queries())
}

pub fn build_links(object_type: ObjectType, queries: &[SearchQuery]) -> Vec<MarketplaceLink> {
    let route = router::route(object_type);
    let links = queries
        .iter()
        .take(MAX_LINKS)
        .map(|query| link_for(route, query.query()))
        .collect::<Vec<_>>();
    info!(
        target = "photosearch.builder",
        object_type = object_type.as_str(),
        marketplace = route.marketplace.as_str(),
        count = links.len(),
        "marketplace_links_built"
    );
    links
}

/// Strict query escaping: everything but `A-Z a-z 0-9 - _ . ~` is encoded.
pub fn encode_query(query: &str) -> String {
    urlencoding::encode(query).into_owned()
}

/// Moves links onto another origin, keeping path and query.
pub fn rebase(links: Vec<MarketplaceLink>, origin: &str) -> Vec<MarketplaceLink> {
    let origin = origin.trim_end_matches('/');
    links
        .into_iter()
        .map(|link| {
            let path = link
                .url()
                .split_once("://")
                .and_then(|(_, rest)| rest.find('/').map(|idx| &rest[idx..]))
                .unwrap_or("/");
            let url = format!("{origin}{path}");
            MarketplaceLink::new(link.marketplace(), link.query().to_string(), url)
        })
        .collect()
}

fn link_for(route: Route, query: &str) -> MarketplaceLink {
    let url = route.render(&encode_query(query));
    debug!(target = "photosearch.builder", url = %url, "link_generated");
    MarketplaceLink::new(route.marketplace, query.to_string(), url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Marketplace;

    fn analysis(object_type: ObjectType, queries: &[&str]) -> AnalysisResult {
        let queries = queries
            .iter()
            .map(|q| SearchQuery::new(*q, 0.9).unwrap())
            .collect();
        AnalysisResult::new(object_type, "objet", queries, 0.9).unwrap()
    }

    fn encoded_part<'a>(url: &'a str, param: &str) -> &'a str {
        let start = url.find(&format!("{param}=")).unwrap() + param.len() + 1;
        let rest = &url[start..];
        rest.split('&').next().unwrap()
    }

    #[test]
    fn book_query_routes_to_abebooks() {
        let links = build(&analysis(ObjectType::Book, &["roman policier français"]));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].marketplace(), Marketplace::Abebooks);
        assert_eq!(links[0].query(), "roman policier français");
        assert_eq!(
            links[0].url(),
            "https://www.abebooks.fr/servlet/SearchResults?kn=roman%20policier%20fran%C3%A7ais&sts=t"
        );
    }

    #[test]
    fn one_link_per_query_in_order() {
        let links = build(&analysis(
            ObjectType::General,
            &["lampe vintage", "lampe laiton", "luminaire ancien"],
        ));
        let queries: Vec<&str> = links.iter().map(|l| l.query()).collect();
        assert_eq!(queries, vec!["lampe vintage", "lampe laiton", "luminaire ancien"]);
        assert!(links.iter().all(|l| l.marketplace() == Marketplace::Leboncoin));
    }

    #[test]
    fn punctuation_and_reserved_characters_are_escaped() {
        let links = build(&analysis(ObjectType::Clothing, &["T-shirt & jean/bleu? 100%"]));
        let encoded = encoded_part(links[0].url(), "search_text");
        assert_eq!(encoded, "T-shirt%20%26%20jean%2Fbleu%3F%20100%25");
    }

    #[test]
    fn decoding_the_url_yields_the_original_query() {
        for query in ["écharpe en laine", "Perceuse Bosch 18V (sans fil)", "l'étranger – Camus"] {
            let links = build(&analysis(ObjectType::Tools, &[query]));
            let encoded = encoded_part(links[0].url(), "text");
            assert_eq!(urlencoding::decode(encoded).unwrap(), query);
        }
    }

    #[test]
    fn output_is_capped() {
        let queries: Vec<SearchQuery> = (0..8)
            .map(|i| SearchQuery::new(format!("objet {i}"), 0.5).unwrap())
            .collect();
        let links = build_links(ObjectType::Furniture, &queries);
        assert_eq!(links.len(), MAX_LINKS);
        assert_eq!(links[4].query(), "objet 4");
    }

    #[test]
    fn rebase_keeps_path_and_query() {
        let links = build(&analysis(ObjectType::Book, &["le petit prince"]));
        let moved = rebase(links, "http://127.0.0.1:8080/");
        assert_eq!(
            moved[0].url(),
            "http://127.0.0.1:8080/servlet/SearchResults?kn=le%20petit%20prince&sts=t"
        );
        assert_eq!(moved[0].marketplace(), Marketplace::Abebooks);
        assert_eq!(moved[0].query(), "le petit prince");
    }

    #[test]
    fn no_queries_means_no_links() {
        assert!(build_links(ObjectType::Book, &[]).is_empty());
    }
}
