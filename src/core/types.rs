// ============================================================================
// Mapping Descriptors
// ============================================================================
//
// The field and relation tables collected once per mapped class by walking
// its persist() declaration. Statement text and schema DDL are generated
// from these descriptors rather than from the class itself.
//
// ============================================================================

use std::ops::BitOr;

use super::SqlValue;

pub type Row = Vec<SqlValue>;

/// Kind of a has-many relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationType {
    /// The other side holds a belongs-to reference to this side.
    ManyToOne,
    /// Both sides are linked through a join table.
    ManyToMany,
}

/// Foreign key constraint flags for a belongs-to reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FkConstraints(u8);

impl FkConstraints {
    pub const NONE: Self = Self(0x00);
    pub const NOT_NULL: Self = Self(0x01);
    pub const ON_UPDATE_CASCADE: Self = Self(0x02);
    pub const ON_UPDATE_SET_NULL: Self = Self(0x04);
    pub const ON_DELETE_CASCADE: Self = Self(0x08);
    pub const ON_DELETE_SET_NULL: Self = Self(0x10);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Referential actions appended to a `foreign key` clause.
    pub fn referential_actions(&self) -> String {
        let mut sql = String::new();
        if self.contains(Self::ON_UPDATE_CASCADE) {
            sql.push_str(" on update cascade");
        } else if self.contains(Self::ON_UPDATE_SET_NULL) {
            sql.push_str(" on update set null");
        }
        if self.contains(Self::ON_DELETE_CASCADE) {
            sql.push_str(" on delete cascade");
        } else if self.contains(Self::ON_DELETE_SET_NULL) {
            sql.push_str(" on delete set null");
        }
        sql
    }
}

impl BitOr for FkConstraints {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Column type families that backends name differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDateTimeType {
    Date,
    DateTime,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Application supplied primary key.
    NaturalId,
    /// Plain value column.
    Value,
    /// Column holding the id of a belongs-to target.
    ForeignKey {
        target_mapping: usize,
        target_table: String,
        /// Name given in `belongs_to`, before the target id name is appended.
        prefix: String,
        constraints: FkConstraints,
    },
}

/// One column of a mapped table, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub sql_type: String,
    pub kind: FieldKind,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            kind,
        }
    }

    pub fn is_natural_id(&self) -> bool {
        matches!(self.kind, FieldKind::NaturalId)
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }
}

/// One has-many or has-one relation of a mapped class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfo {
    pub target_mapping: usize,
    pub target_table: String,
    pub relation: RelationType,
    /// Belongs-to name on the other side (many-to-one) or join table name.
    pub join_name: String,
    pub join_id: Option<String>,
    pub fk_constraints: FkConstraints,
    /// True when declared through `has_one`.
    pub weak: bool,
    /// Column referencing this side: in the other table for many-to-one,
    /// in the join table for many-to-many.
    pub self_column: String,
    /// Join table column referencing the other side (many-to-many only).
    pub other_column: String,
    /// First statement index for this relation.
    pub statement_index: usize,
}

impl SetInfo {
    pub fn statement_count(&self) -> usize {
        statement_count(self.relation)
    }
}

/// Statements prepared per relation: a select, plus join table insert and
/// delete for many-to-many.
pub fn statement_count(relation: RelationType) -> usize {
    match relation {
        RelationType::ManyToOne => 1,
        RelationType::ManyToMany => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fk_constraint_actions() {
        let fk = FkConstraints::NOT_NULL | FkConstraints::ON_DELETE_CASCADE;
        assert!(fk.contains(FkConstraints::NOT_NULL));
        assert!(!fk.contains(FkConstraints::ON_UPDATE_CASCADE));
        assert_eq!(fk.referential_actions(), " on delete cascade");
        assert_eq!(FkConstraints::NONE.referential_actions(), "");
    }

    #[test]
    fn test_statement_count_per_relation() {
        assert_eq!(statement_count(RelationType::ManyToOne), 1);
        assert_eq!(statement_count(RelationType::ManyToMany), 3);
    }
}
