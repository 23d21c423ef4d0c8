// Type-to-storage dispatch for interests.
//
// Every read and write path goes through `resolve_mapping`, so the three-way
// mapping lives in exactly one place. Note the foreign key is NOT uniform:
// machinery requests join on `request_id`, the two project kinds on `interest_id`.

use super::interest_models::InterestKind;

/// Where one interest kind is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMapping {
    pub primary_table: &'static str,
    pub message_table: &'static str,
    pub foreign_key_column: &'static str,
}

pub fn resolve_mapping(kind: InterestKind) -> TableMapping {
    match kind {
        InterestKind::CommunityProject => TableMapping {
            primary_table: "community_project_interests",
            message_table: "community_project_interest_messages",
            foreign_key_column: "interest_id",
        },
        InterestKind::DevelopmentProject => TableMapping {
            primary_table: "development_project_interests",
            message_table: "development_project_interest_messages",
            foreign_key_column: "interest_id",
        },
        InterestKind::MachineryRequest => TableMapping {
            primary_table: "machinery_purchase_requests",
            message_table: "machinery_request_messages",
            foreign_key_column: "request_id",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interests::InterestError;
    use std::collections::HashSet;

    #[test]
    fn test_documented_mappings() {
        assert_eq!(
            resolve_mapping(InterestKind::CommunityProject),
            TableMapping {
                primary_table: "community_project_interests",
                message_table: "community_project_interest_messages",
                foreign_key_column: "interest_id",
            }
        );
        assert_eq!(
            resolve_mapping(InterestKind::DevelopmentProject),
            TableMapping {
                primary_table: "development_project_interests",
                message_table: "development_project_interest_messages",
                foreign_key_column: "interest_id",
            }
        );
        assert_eq!(
            resolve_mapping(InterestKind::MachineryRequest),
            TableMapping {
                primary_table: "machinery_purchase_requests",
                message_table: "machinery_request_messages",
                foreign_key_column: "request_id",
            }
        );
    }

    #[test]
    fn test_every_kind_has_its_own_tables() {
        let primaries: HashSet<_> = InterestKind::ALL
            .iter()
            .map(|k| resolve_mapping(*k).primary_table)
            .collect();
        let threads: HashSet<_> = InterestKind::ALL
            .iter()
            .map(|k| resolve_mapping(*k).message_table)
            .collect();

        assert_eq!(primaries.len(), 3);
        assert_eq!(threads.len(), 3);
        assert!(primaries.is_disjoint(&threads));
    }

    #[test]
    fn test_fourth_kind_is_rejected() {
        let err = "warehouse_lease".parse::<InterestKind>().unwrap_err();
        assert!(matches!(err, InterestError::InvalidKind(_)));

        let kind: InterestKind = "machinery".parse().unwrap();
        assert_eq!(resolve_mapping(kind).foreign_key_column, "request_id");
    }
}
