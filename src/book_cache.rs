//! Per-ticker top-of-book cache, updated from the gateway's snapshot/delta
//! stream. Writer-single (the stream reader task), reader-many (quoting
//! core); readers take a short value-copy snapshot and never hold a lock
//! across a suspension point.

use crate::types::Book;
use std::collections::HashMap;
use std::sync::RwLock;

/// A single price-level update within a delta: the new resting quantity at
/// a given price, zero meaning the level emptied.
#[derive(Debug, Clone, Copy)]
pub struct BookLevel {
    pub price: u8,
    pub qty: u32,
}

#[derive(Debug, Clone)]
pub struct BookDelta {
    pub ticker: String,
    pub yes: Vec<BookLevel>,
    pub no: Vec<BookLevel>,
}

#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub ticker: String,
    /// Full bid ladder, descending by price, both sides.
    pub yes: Vec<BookLevel>,
    pub no: Vec<BookLevel>,
}

fn top_two(levels: &[BookLevel]) -> (u8, u32, u8) {
    let mut sorted: Vec<&BookLevel> = levels.iter().filter(|l| l.qty > 0).collect();
    sorted.sort_by(|a, b| b.price.cmp(&a.price));
    let best = sorted.first().map(|l| (l.price, l.qty)).unwrap_or((0, 0));
    let second = sorted.get(1).map(|l| l.price).unwrap_or(0);
    (best.0, best.1, second)
}

pub struct BookCache {
    books: RwLock<HashMap<String, Book>>,
}

impl Default for BookCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BookCache {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Read-only value-copy snapshot; safe to hold across awaits since it
    /// owns no lock guard.
    pub fn get(&self, ticker: &str) -> Option<Book> {
        self.books.read().unwrap().get(ticker).copied()
    }

    pub fn apply_snapshot(&self, snapshot: BookSnapshot) {
        let (best_yes_bid, best_yes_bid_qty, second_yes_bid) = top_two(&snapshot.yes);
        let (best_no_bid, best_no_bid_qty, second_no_bid) = top_two(&snapshot.no);
        let book = Book {
            best_yes_bid,
            best_yes_bid_qty,
            second_yes_bid,
            best_no_bid,
            best_no_bid_qty,
            second_no_bid,
        };
        self.books.write().unwrap().insert(snapshot.ticker, book);
    }

    /// Applies a delta against the full ladder implied by the existing
    /// top-of-book entry. Since the cache only retains the top two levels,
    /// a delta naming a price at or above the second level replaces that
    /// level directly; anything deeper than what we track is dropped,
    /// matching the cache's "top-of-book only" contract (§2).
    pub fn apply_delta(&self, delta: BookDelta) {
        let mut books = self.books.write().unwrap();
        let entry = books.entry(delta.ticker).or_default();

        for level in delta.yes {
            apply_level(&mut entry.best_yes_bid, &mut entry.best_yes_bid_qty, &mut entry.second_yes_bid, level);
        }
        for level in delta.no {
            apply_level(&mut entry.best_no_bid, &mut entry.best_no_bid_qty, &mut entry.second_no_bid, level);
        }
    }

    pub fn is_ready(&self, ticker: &str) -> bool {
        self.get(ticker).map(|b| b.is_ready()).unwrap_or(false)
    }
}

fn apply_level(best: &mut u8, best_qty: &mut u32, second: &mut u8, level: BookLevel) {
    if level.qty == 0 {
        if level.price == *best {
            *best = *second;
            *best_qty = 0;
            *second = 0;
        } else if level.price == *second {
            *second = 0;
        }
        return;
    }
    if level.price > *best {
        *second = *best;
        *best = level.price;
        *best_qty = level.qty;
    } else if level.price == *best {
        *best_qty = level.qty;
    } else if level.price > *second {
        *second = level.price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S8 (invariant #8): regardless of event order, the final cached
    /// top-of-book equals the top of the final true book state.
    #[test]
    fn snapshot_then_deltas_converge_to_final_book() {
        let cache = BookCache::new();
        cache.apply_snapshot(BookSnapshot {
            ticker: "T".into(),
            yes: vec![
                BookLevel { price: 50, qty: 10 },
                BookLevel { price: 48, qty: 5 },
            ],
            no: vec![BookLevel { price: 40, qty: 3 }],
        });

        cache.apply_delta(BookDelta {
            ticker: "T".into(),
            yes: vec![BookLevel { price: 52, qty: 7 }],
            no: vec![],
        });

        let book = cache.get("T").unwrap();
        assert_eq!(book.best_yes_bid, 52);
        assert_eq!(book.best_yes_bid_qty, 7);
        assert_eq!(book.second_yes_bid, 50);
    }

    #[test]
    fn zeroing_the_best_level_promotes_second() {
        let cache = BookCache::new();
        cache.apply_snapshot(BookSnapshot {
            ticker: "T".into(),
            yes: vec![
                BookLevel { price: 50, qty: 10 },
                BookLevel { price: 48, qty: 5 },
            ],
            no: vec![],
        });
        cache.apply_delta(BookDelta {
            ticker: "T".into(),
            yes: vec![BookLevel { price: 50, qty: 0 }],
            no: vec![],
        });
        let book = cache.get("T").unwrap();
        assert_eq!(book.best_yes_bid, 48);
    }

    #[test]
    fn cold_cache_reports_not_ready() {
        let cache = BookCache::new();
        assert!(!cache.is_ready("UNKNOWN"));
    }
}
