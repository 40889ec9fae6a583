//! Duplicate product detection.

use std::collections::BTreeMap;

use crate::ProductId;
use crate::naming::normalize_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCandidate {
    pub id: ProductId,
    pub name: String,
    pub has_image: bool,
    pub has_category: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub normalized_name: String,
    pub keeper: ProductId,
    pub duplicates: Vec<ProductId>,
}

/// Groups live products sharing a normalized name.
///
/// The keeper is the product with an image, then one with a category, then
/// the newest id. Groups come back ordered by normalized name; names that
/// normalize to nothing are never grouped.
pub fn group_duplicates(candidates: &[DuplicateCandidate]) -> Vec<DuplicateGroup> {
    let mut by_name: BTreeMap<String, Vec<&DuplicateCandidate>> = BTreeMap::new();
    for c in candidates {
        let key = normalize_name(&c.name);
        if !key.is_empty() {
            by_name.entry(key).or_default().push(c);
        }
    }

    by_name
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(normalized_name, mut members)| {
            members.sort_by(|a, b| {
                (b.has_image, b.has_category, b.id).cmp(&(a.has_image, a.has_category, a.id))
            });
            let keeper = members[0].id;
            let duplicates = members[1..].iter().map(|c| c.id).collect();
            DuplicateGroup { normalized_name, keeper, duplicates }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_core::AggregateId;

    fn candidate(name: &str, has_image: bool, has_category: bool) -> DuplicateCandidate {
        DuplicateCandidate {
            id: ProductId::new(AggregateId::new()),
            name: name.to_string(),
            has_image,
            has_category,
        }
    }

    #[test]
    fn image_beats_category_beats_recency() {
        let with_image = candidate("Parle-G", true, false);
        let with_category = candidate("parle g", false, true);
        let newest = candidate("PARLE G", false, false);

        let groups = group_duplicates(&[with_image.clone(), with_category.clone(), newest.clone()]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keeper, with_image.id);
        assert_eq!(groups[0].duplicates, vec![with_category.id, newest.id]);
    }

    #[test]
    fn highest_id_wins_a_tie() {
        let a = candidate("Lux", false, false);
        let b = candidate("LUX", false, false);
        let groups = group_duplicates(&[a.clone(), b.clone()]);
        assert_eq!(groups[0].keeper, a.id.max(b.id));
    }

    #[test]
    fn singletons_are_not_groups() {
        let groups = group_duplicates(&[candidate("Lux", false, false), candidate("Dove", true, true)]);
        assert!(groups.is_empty());
    }
}
