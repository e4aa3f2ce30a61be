// =============================================================================
// Pricing helpers shared by the snapshot list and the detail view
// =============================================================================

/// Shown when the provider has no usable description.
pub const NO_DESCRIPTION: &str = "No description available.";

/// The 24h percentage change to report: the currency-specific figure when the
/// provider has one, otherwise the currency-agnostic one.
pub fn effective_pct(pct_in_currency: Option<f64>, pct_generic: Option<f64>) -> Option<f64> {
    pct_in_currency.or(pct_generic)
}

/// Price 24 hours ago, reconstructed from the current price and the 24h change:
/// `current / (1 + pct / 100)`.
///
/// Without any percentage the current price is returned. A change of -100% or
/// worse has no meaningful opening price and yields `None`.
pub fn opening_price(current: f64, pct_in_currency: Option<f64>, pct_generic: Option<f64>) -> Option<f64> {
    let Some(pct) = effective_pct(pct_in_currency, pct_generic) else {
        return Some(current);
    };

    let denominator = 1.0 + pct / 100.0;
    if !denominator.is_finite() || denominator <= 0.0 {
        return None;
    }
    Some(current / denominator)
}

/// First sentence of a provider description: the text before the first `". "`
/// with a closing period. Text without that delimiter is kept whole and gets a
/// closing period only if it lacks one.
pub fn first_sentence(description: Option<&str>) -> String {
    let text = match description.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return NO_DESCRIPTION.to_string(),
    };

    match text.split_once(". ") {
        Some((head, _)) => format!("{head}."),
        None if text.ends_with('.') => text.to_string(),
        None => format!("{text}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Equal within 1e-9 of the larger magnitude.
    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
    }

    /// Deterministic `(current, pct)` pairs from a 64-bit LCG: prices spread
    /// over ten orders of magnitude, changes between -99% and +500%.
    fn price_change_pairs(seed: u64, count: usize) -> Vec<(f64, f64)> {
        let mut state = seed;
        let mut unit = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as f64 / (1u64 << 31) as f64
        };
        (0..count)
            .map(|_| {
                let current = 10f64.powf(unit() * 10.0 - 4.0);
                let pct = unit() * 599.0 - 99.0;
                (current, pct)
            })
            .collect()
    }

    #[test]
    fn opening_price_inverts_the_percentage() {
        for seed in 1..20 {
            for (current, pct) in price_change_pairs(seed, 200) {
                let open = opening_price(current, Some(pct), None).unwrap();
                assert!(
                    approx(open * (1.0 + pct / 100.0), current),
                    "seed {seed}: current {current}, pct {pct}, open {open}"
                );

                let via_generic = opening_price(current, None, Some(pct)).unwrap();
                assert_eq!(open, via_generic);
            }
        }
    }

    #[test]
    fn currency_specific_change_wins() {
        let open = opening_price(120.0, Some(20.0), Some(50.0)).unwrap();
        assert!(approx(open, 100.0));
    }

    #[test]
    fn generic_change_is_the_fallback() {
        let open = opening_price(150.0, None, Some(50.0)).unwrap();
        assert!(approx(open, 100.0));
    }

    #[test]
    fn no_change_means_flat() {
        assert_eq!(opening_price(42.0, None, None), Some(42.0));
    }

    #[test]
    fn total_loss_has_no_opening_price() {
        assert_eq!(opening_price(0.0, Some(-100.0), None), None);
        assert_eq!(opening_price(1.0, Some(-150.0), None), None);
    }

    #[test]
    fn first_sentence_stops_at_first_delimiter() {
        assert_eq!(
            first_sentence(Some("Bitcoin is money. It was created in 2009. More.")),
            "Bitcoin is money."
        );
    }

    #[test]
    fn first_sentence_without_delimiter_is_whole_text() {
        assert_eq!(first_sentence(Some("v2.0 release notes")), "v2.0 release notes.");
        assert_eq!(first_sentence(Some("Ends here.")), "Ends here.");
    }

    #[test]
    fn missing_or_blank_description_uses_placeholder() {
        assert_eq!(first_sentence(None), NO_DESCRIPTION);
        assert_eq!(first_sentence(Some("   ")), NO_DESCRIPTION);
    }
}
