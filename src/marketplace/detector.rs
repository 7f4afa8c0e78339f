use crate::models::Marketplace;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, warn};

struct DetectionProfile {
    /// Lowercase phrases that only appear on an empty result page.
    no_results_phrases: &'static [&'static str],
    listing_selector: &'static str,
}

const ABEBOOKS_PROFILE: DetectionProfile = DetectionProfile {
    no_results_phrases: &["aucun résultat", "no results found", "0 résultat"],
    listing_selector: ".result-item, .cf-search-results-content, #srp-results",
};

const VINTED_PROFILE: DetectionProfile = DetectionProfile {
    no_results_phrases: &["aucun article", "aucun résultat"],
    listing_selector: ".feed-grid__item, .ItemBox_container, [data-testid='item-box']",
};

const LEBONCOIN_PROFILE: DetectionProfile = DetectionProfile {
    no_results_phrases: &["aucune annonce", "0 annonce trouvée", "pas de résultat"],
    listing_selector: "[data-qa-id='aditem_container'], .styles_adCard, [data-test-id='ad']",
};

fn profile(marketplace: Marketplace) -> &'static DetectionProfile {
    match marketplace {
        Marketplace::Abebooks => &ABEBOOKS_PROFILE,
        Marketplace::Vinted => &VINTED_PROFILE,
        Marketplace::Leboncoin => &LEBONCOIN_PROFILE,
    }
}

static ABEBOOKS_SELECTOR: Lazy<Option<Selector>> =
    Lazy::new(|| compile(ABEBOOKS_PROFILE.listing_selector));
static VINTED_SELECTOR: Lazy<Option<Selector>> =
    Lazy::new(|| compile(VINTED_PROFILE.listing_selector));
static LEBONCOIN_SELECTOR: Lazy<Option<Selector>> =
    Lazy::new(|| compile(LEBONCOIN_PROFILE.listing_selector));

fn compile(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(target = "photosearch.detector", selector, error = ?err, "listing_selector_invalid");
            None
        }
    }
}

fn listing_selector(marketplace: Marketplace) -> Option<&'static Selector> {
    match marketplace {
        Marketplace::Abebooks => ABEBOOKS_SELECTOR.as_ref(),
        Marketplace::Vinted => VINTED_SELECTOR.as_ref(),
        Marketplace::Leboncoin => LEBONCOIN_SELECTOR.as_ref(),
    }
}

/// Decides whether a marketplace search page lists at least one item.
///
/// A negative phrase in the visible text wins over any listing element, since
/// marketplaces render empty result containers next to their "no results"
/// banner. When neither signal fires the page is assumed to have results.
/// Unknown marketplace ids always yield `true`.
pub fn has_results(html: &str, marketplace_id: &str) -> bool {
    match Marketplace::from_id(marketplace_id) {
        Some(marketplace) => has_results_for(html, marketplace),
        None => {
            debug!(
                target = "photosearch.detector",
                marketplace = marketplace_id,
                "unknown_marketplace_assume_results"
            );
            true
        }
    }
}

pub fn has_results_for(html: &str, marketplace: Marketplace) -> bool {
    let profile = profile(marketplace);
    let document = Html::parse_document(html);
    let text = visible_text(&document);

    if let Some(phrase) = profile
        .no_results_phrases
        .iter()
        .find(|phrase| contains_phrase(&text, phrase))
    {
        debug!(
            target = "photosearch.detector",
            marketplace = marketplace.as_str(),
            phrase = *phrase,
            "no_results_indicator"
        );
        return false;
    }

    if let Some(selector) = listing_selector(marketplace) {
        let count = document.select(selector).count();
        if count > 0 {
            debug!(
                target = "photosearch.detector",
                marketplace = marketplace.as_str(),
                count,
                "listing_elements_found"
            );
            return true;
        }
    }

    debug!(
        target = "photosearch.detector",
        marketplace = marketplace.as_str(),
        "no_signal_assume_results"
    );
    true
}

/// Lowercased text of the document outside script-like elements, with every
/// whitespace run collapsed to a single space.
fn visible_text(document: &Html) -> String {
    let mut raw = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor.value().as_element().is_some_and(|element| {
                matches!(element.name(), "script" | "style" | "noscript" | "template")
            })
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Substring match that refuses hits glued to a preceding letter or digit,
/// so "0 résultat" does not fire on "120 résultats".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(idx, _)| {
        text[..idx]
            .chars()
            .next_back()
            .is_none_or(|prev| !prev.is_alphanumeric())
    })
}
