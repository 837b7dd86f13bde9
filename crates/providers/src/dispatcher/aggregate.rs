//! Merging of results from several providers answering the same request.
//!
//! Market snapshots:
//! - price: median of the source prices
//! - 24h change: mean of the reported values
//! - 24h volume: largest reported value
//! - spread: highest minus lowest source price, absent if it overflows
//!
//! News feeds are concatenated in candidate order with duplicate URLs dropped.
//! Any other payload keeps the first contributor's answer.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::warn;

use crate::models::{MarketSnapshot, NewsFeed, Payload, ProviderId, SourceQuote};

/// Merge successful results, given in candidate order.
///
/// Returns `None` when `results` is empty.
pub(crate) fn merge_payloads(results: Vec<(ProviderId, Payload)>) -> Option<(Payload, Vec<ProviderId>)> {
    let provider_ids: Vec<ProviderId> = results.iter().map(|(id, _)| id.clone()).collect();
    let (is_market, is_news) = match results.first().map(|(_, payload)| payload)? {
        Payload::Market(_) => (true, false),
        Payload::News(_) => (false, true),
        _ => (false, false),
    };

    let payload = if is_market {
        let snapshots: Vec<(ProviderId, MarketSnapshot)> = results
            .into_iter()
            .filter_map(|(id, payload)| match payload {
                Payload::Market(snapshot) => Some((id, snapshot)),
                _ => None,
            })
            .collect();
        Payload::Market(merge_market(snapshots)?)
    } else if is_news {
        let feeds = results.into_iter().filter_map(|(_, payload)| match payload {
            Payload::News(feed) => Some(feed),
            _ => None,
        });
        Payload::News(merge_news(feeds))
    } else {
        results.into_iter().next()?.1
    };

    Some((payload, provider_ids))
}

pub(crate) fn merge_market(snapshots: Vec<(ProviderId, MarketSnapshot)>) -> Option<MarketSnapshot> {
    let (_, first) = snapshots.first()?;
    let symbol = first.symbol.clone();

    let mut prices: Vec<Decimal> = snapshots.iter().map(|(_, s)| s.price).collect();
    prices.sort();
    let mid = prices.len() / 2;
    let price = if prices.len() % 2 == 0 {
        let (low, high) = (prices[mid - 1], prices[mid]);
        match low.checked_add(high) {
            Some(sum) => sum / Decimal::TWO,
            // same sign on overflow, so the gap fits
            None => low + (high - low) / Decimal::TWO,
        }
    } else {
        prices[mid]
    };
    let spread = prices[prices.len() - 1].checked_sub(prices[0]);

    let change_24h_pct = mean_change(&snapshots);

    let volume_24h = snapshots.iter().filter_map(|(_, s)| s.volume_24h).max();

    let quotes = snapshots
        .into_iter()
        .map(|(provider_id, s)| SourceQuote {
            provider_id,
            price: s.price,
        })
        .collect();

    Some(MarketSnapshot {
        symbol,
        price,
        change_24h_pct,
        volume_24h,
        price_spread: spread,
        quotes,
    })
}

/// Mean of the reported 24h changes. A source whose value would overflow the
/// running sum is left out.
fn mean_change(snapshots: &[(ProviderId, MarketSnapshot)]) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    let mut count: u32 = 0;
    for (provider_id, snapshot) in snapshots {
        let Some(change) = snapshot.change_24h_pct else {
            continue;
        };
        match sum.checked_add(change) {
            Some(next) => {
                sum = next;
                count += 1;
            }
            None => warn!(
                "Dropping 24h change {} from {}: sum overflows",
                change, provider_id
            ),
        }
    }
    (count > 0).then(|| sum / Decimal::from(count))
}

fn merge_news(feeds: impl Iterator<Item = NewsFeed>) -> NewsFeed {
    let mut seen = HashSet::new();
    let articles = feeds
        .flat_map(|feed| feed.articles)
        .filter(|article| seen.insert(article.url.clone()))
        .collect();
    NewsFeed { articles }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::NewsArticle;

    fn snapshot(price: Decimal, change: Option<Decimal>, volume: Option<Decimal>) -> MarketSnapshot {
        MarketSnapshot {
            change_24h_pct: change,
            volume_24h: volume,
            ..MarketSnapshot::new("BTC", price)
        }
    }

    fn id(s: &str) -> ProviderId {
        ProviderId::from(s)
    }

    #[test]
    fn test_market_merge_odd_count() {
        let merged = merge_market(vec![
            (id("a"), snapshot(dec!(110), Some(dec!(2.0)), Some(dec!(500)))),
            (id("b"), snapshot(dec!(100), None, Some(dec!(900)))),
            (id("c"), snapshot(dec!(102), Some(dec!(4.0)), None)),
        ])
        .unwrap();

        assert_eq!(merged.price, dec!(102));
        assert_eq!(merged.price_spread, Some(dec!(10)));
        assert_eq!(merged.change_24h_pct, Some(dec!(3.0)));
        assert_eq!(merged.volume_24h, Some(dec!(900)));
        let sources: Vec<&str> = merged.quotes.iter().map(|q| &*q.provider_id).collect();
        assert_eq!(sources, ["a", "b", "c"]);
    }

    #[test]
    fn test_market_merge_even_count_averages_middle() {
        let merged = merge_market(vec![
            (id("a"), snapshot(dec!(100), None, None)),
            (id("b"), snapshot(dec!(101), None, None)),
        ])
        .unwrap();

        assert_eq!(merged.price, dec!(100.5));
        assert_eq!(merged.price_spread, Some(dec!(1)));
        assert!(merged.change_24h_pct.is_none());
        assert!(merged.volume_24h.is_none());
    }

    #[test]
    fn test_single_source() {
        let merged = merge_market(vec![(id("a"), snapshot(dec!(64000), None, None))]).unwrap();
        assert_eq!(merged.price, dec!(64000));
        assert_eq!(merged.price_spread, Some(Decimal::ZERO));
        assert_eq!(merged.quotes.len(), 1);
    }

    #[test]
    fn test_market_merge_extreme_values() {
        let merged = merge_market(vec![
            (id("a"), snapshot(Decimal::MAX, Some(Decimal::MAX), None)),
            (id("b"), snapshot(Decimal::MAX, Some(Decimal::MAX), None)),
        ])
        .unwrap();

        assert_eq!(merged.price, Decimal::MAX);
        assert_eq!(merged.price_spread, Some(Decimal::ZERO));
        assert_eq!(merged.change_24h_pct, Some(Decimal::MAX));
        assert_eq!(merged.quotes.len(), 2);
    }

    #[test]
    fn test_market_merge_spread_overflow_is_absent() {
        let merged = merge_market(vec![
            (id("a"), snapshot(Decimal::MIN, Some(dec!(1)), None)),
            (id("b"), snapshot(Decimal::MAX, Some(dec!(3)), None)),
        ])
        .unwrap();

        assert_eq!(merged.price, Decimal::ZERO);
        assert!(merged.price_spread.is_none());
        assert_eq!(merged.change_24h_pct, Some(dec!(2)));
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_market(Vec::new()).is_none());
        assert!(merge_payloads(Vec::new()).is_none());
    }

    #[test]
    fn test_news_merge_drops_duplicate_urls() {
        let article = |title: &str, url: &str| NewsArticle {
            title: title.to_string(),
            url: url.to_string(),
            source: None,
            published_at: None,
        };
        let (payload, ids) = merge_payloads(vec![
            (
                id("a"),
                Payload::News(NewsFeed {
                    articles: vec![article("one", "https://x/1"), article("two", "https://x/2")],
                }),
            ),
            (
                id("b"),
                Payload::News(NewsFeed {
                    articles: vec![article("two again", "https://x/2"), article("three", "https://x/3")],
                }),
            ),
        ])
        .unwrap();

        let Payload::News(feed) = payload else {
            panic!("expected news");
        };
        let titles: Vec<&str> = feed.articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, ["one", "two", "three"]);
        assert_eq!(ids, [id("a"), id("b")]);
    }
}
