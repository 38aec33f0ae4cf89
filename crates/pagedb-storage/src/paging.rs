//! Bounded sorted insertion shared by table pages and index pages

/// Outcome of inserting into a capacity-bounded sorted page
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Placement<T> {
    /// The item fit; nothing left over
    Absorbed,
    /// The item fit and pushed the page's tail item out
    Evicted(T),
    /// The page is full and the item sorts after all of it; page untouched
    Rejected(T),
}

impl<T> Placement<T> {
    /// Whether the page was modified
    pub(crate) fn changed(&self) -> bool {
        !matches!(self, Placement::Rejected(_))
    }

    /// The item that must move on to the next page, if any
    pub(crate) fn into_overflow(self) -> Option<T> {
        match self {
            Placement::Absorbed => None,
            Placement::Evicted(item) | Placement::Rejected(item) => Some(item),
        }
    }
}

/// Insert `item` before the first element that `sorts_after` it.
///
/// Equal elements keep their relative order, so the new item lands after
/// existing equals. `items` never grows beyond `capacity`.
pub(crate) fn insert_bounded<T>(
    items: &mut Vec<T>,
    item: T,
    capacity: usize,
    sorts_after: impl Fn(&T) -> bool,
) -> Placement<T> {
    let position = items.iter().position(sorts_after).unwrap_or(items.len());

    if position == items.len() && items.len() >= capacity {
        return Placement::Rejected(item);
    }

    items.insert(position, item);
    if items.len() > capacity {
        // the tail moves on; capacity >= 1 so pop always yields
        match items.pop() {
            Some(tail) => Placement::Evicted(tail),
            None => Placement::Absorbed,
        }
    } else {
        Placement::Absorbed
    }
}

/// Locate the page an ordered insertion starts from.
///
/// Returns the page before the first one whose minimum is `>=` the new item,
/// clamped to 0; with no such page, the last page. `first_at_or_after` is
/// checked in page order and may stop early.
pub(crate) fn locate_start<E>(
    page_count: usize,
    mut first_at_or_after: impl FnMut(usize) -> Result<bool, E>,
) -> Result<usize, E> {
    let mut page = 0;
    while page < page_count {
        if first_at_or_after(page)? {
            break;
        }
        page += 1;
    }
    Ok(page.saturating_sub(1))
}
