use serde::Serialize;

use crate::view::ListQuery;

/// Numbered pages shown around the current one.
pub const MAX_VISIBLE_PAGES: usize = 5;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageControl {
    /// `target` is `None` when disabled.
    Prev { target: Option<usize> },
    Page { number: usize, current: bool },
    Ellipsis,
    Next { target: Option<usize> },
}

impl PageControl {
    pub fn target(&self) -> Option<usize> {
        match *self {
            PageControl::Prev { target } | PageControl::Next { target } => target,
            PageControl::Page { number, .. }                             => Some(number),
            PageControl::Ellipsis                                        => None,
        }
    }
}

/// Prev, a window of up to five pages centred on `current`, next.
///
/// Page 1 and the last page stay reachable as anchors outside the window,
/// with an ellipsis wherever pages are skipped.
pub fn page_controls(current: usize, total: usize) -> Vec<PageControl> {
    let current = current.clamp(1, total.max(1));
    let mut controls = Vec::with_capacity(MAX_VISIBLE_PAGES + 6);

    controls.push(PageControl::Prev {
        target: (current > 1).then(|| current - 1),
    });

    if total > 0 {
        let mut start = current.saturating_sub(MAX_VISIBLE_PAGES / 2).max(1);
        let end       = (start + MAX_VISIBLE_PAGES - 1).min(total);
        if end - start + 1 < MAX_VISIBLE_PAGES {
            start = (end + 1).saturating_sub(MAX_VISIBLE_PAGES).max(1);
        }

        if start > 1 {
            controls.push(PageControl::Page { number: 1, current: false });
            if start > 2 {
                controls.push(PageControl::Ellipsis);
            }
        }

        controls.extend((start..=end).map(|number| PageControl::Page {
            number,
            current: number == current,
        }));

        if end < total {
            if end + 1 < total {
                controls.push(PageControl::Ellipsis);
            }
            controls.push(PageControl::Page { number: total, current: false });
        }
    }

    controls.push(PageControl::Next {
        target: (current < total).then(|| current + 1),
    });

    controls
}

/// A control plus the query string that navigates to its target.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    #[serde(flatten)]
    pub control: PageControl,
    pub query:   Option<String>,
}

pub fn page_links(query: &ListQuery, current: usize, total: usize) -> Vec<PageLink> {
    page_controls(current, total)
        .into_iter()
        .map(|control| PageLink {
            query: control
                .target()
                .filter(|_| !matches!(control, PageControl::Page { current: true, .. }))
                .map(|page| query.with_page(page).to_query_string()),
            control,
        })
        .collect()
}
