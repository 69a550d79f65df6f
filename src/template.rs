//! Template (C9): an ordered sequence of filter references with display
//! metadata, used to assemble a multi-song playlist in one step.

/// A reference to a stored [`crate::filter::Filter`] plus the per-item
/// duration override a template position can carry.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateItem {
    pub filter_id: i64,
    /// Overrides the filter's own duration limit when present; `None` means
    /// inherit the filter's limit (which may itself be unlimited).
    pub duration_limit: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub id: Option<i64>,
    pub name: String,
    pub items: Vec<TemplateItem>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn append(&mut self, filter_id: i64, duration_limit: Option<f64>) {
        self.items.push(TemplateItem {
            filter_id,
            duration_limit,
        });
    }

    pub fn insert_at(&mut self, idx: usize, filter_id: i64, duration_limit: Option<f64>) {
        self.items.insert(
            idx,
            TemplateItem {
                filter_id,
                duration_limit,
            },
        );
    }

    pub fn delete_at(&mut self, idx: usize) -> TemplateItem {
        self.items.remove(idx)
    }

    /// Swap two adjacent (or any two) positions. A no-op if `a == b`, mirroring
    /// the source's rejection of swapping an index with itself.
    pub fn swap_positions(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.items.swap(a, b);
    }

    /// Strip every item referencing `filter_id`. Used when a filter is
    /// deleted from the store and must be cascaded out of every template.
    pub fn remove_all_filter_refs(&mut self, filter_id: i64) {
        self.items.retain(|item| item.filter_id != filter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_insert_maintain_order() {
        let mut t = Template::new("Waltz set");
        t.append(1, None);
        t.append(2, Some(60.0));
        t.insert_at(1, 3, None);
        let ids: Vec<i64> = t.items.iter().map(|i| i.filter_id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn swap_self_is_a_no_op() {
        let mut t = Template::new("x");
        t.append(1, None);
        t.append(2, None);
        t.swap_positions(0, 0);
        assert_eq!(t.items[0].filter_id, 1);
    }

    #[test]
    fn remove_all_filter_refs_strips_every_occurrence() {
        let mut t = Template::new("x");
        t.append(1, None);
        t.append(2, None);
        t.append(1, None);
        t.remove_all_filter_refs(1);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].filter_id, 2);
    }
}
