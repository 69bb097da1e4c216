//! Row-to-entity mapping

use crate::database::Row;
use crate::error::{DatabaseError, Result};
use crate::mapping::{Entity, EntityDescriptor};

/// Build an entity from a result row
///
/// Returns `None` for a row whose first column is NULL. Labels are matched
/// to properties ignoring case; NULL values leave the field at its default
/// and labels with no matching property are ignored.
pub(crate) fn map_row<E: Entity>(descriptor: &EntityDescriptor, row: Row) -> Result<Option<E>> {
    if row.leading_is_null() {
        return Ok(None);
    }

    let mut entity = E::default();
    for (label, value) in row.into_columns() {
        if value.is_null() {
            continue;
        }
        let Some(column) = descriptor.find_column(&label) else {
            continue;
        };
        entity.assign(&column.property_name, value).map_err(|e| {
            DatabaseError::type_conversion(format!(
                "{}.{}: {}",
                descriptor.type_name, column.property_name, e
            ))
        })?;
    }
    Ok(Some(entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseErrorKind, Error};
    use crate::mapping::{describe_entity, SqlValue};
    use crate::testing::{row, Customer, OrderStatus, SalesOrder, Widget};

    #[test]
    fn test_labels_match_ignoring_case() {
        let descriptor = describe_entity::<Widget>().unwrap();
        let widget: Widget = map_row(
            &descriptor,
            row([("ID", SqlValue::Integer(4)), ("name", SqlValue::from("sprocket"))]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(widget.id, 4);
        assert_eq!(widget.name, "sprocket");
    }

    #[test]
    fn test_leading_null_skips_row() {
        let descriptor = describe_entity::<Widget>().unwrap();
        let mapped: Option<Widget> = map_row(
            &descriptor,
            row([("Id", SqlValue::Null), ("Name", SqlValue::from("ghost"))]),
        )
        .unwrap();
        assert!(mapped.is_none());
    }

    #[test]
    fn test_nulls_and_unknown_labels_are_ignored() {
        let descriptor = describe_entity::<Customer>().unwrap();
        let customer: Customer = map_row(
            &descriptor,
            row([
                ("Id", SqlValue::Integer(9)),
                ("Name", SqlValue::from("Acme")),
                ("Region", SqlValue::Null),
                ("LoyaltyTier", SqlValue::from("gold")),
            ]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(customer.base.id, 9);
        assert_eq!(customer.name, "Acme");
        assert_eq!(customer.region, None);
    }

    #[test]
    fn test_enum_discriminant_maps_back() {
        let descriptor = describe_entity::<SalesOrder>().unwrap();
        let order: SalesOrder = map_row(
            &descriptor,
            row([("Id", SqlValue::Integer(1)), ("Status", SqlValue::Integer(1))]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
    }

    #[test]
    fn test_mismatched_value_is_type_conversion_error() {
        let descriptor = describe_entity::<Widget>().unwrap();
        let result: Result<Option<Widget>> = map_row(
            &descriptor,
            row([("Id", SqlValue::from("not a number"))]),
        );
        match result {
            Err(Error::FatalDatabase(e)) => assert_eq!(e.kind, DatabaseErrorKind::TypeConversion),
            other => panic!("expected a type conversion error, got {:?}", other),
        }
    }
}
