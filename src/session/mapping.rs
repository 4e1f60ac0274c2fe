// ============================================================================
// Class Mappings
// ============================================================================
//
// One Mapping per mapped class. Its MappingInfo is collected lazily, the
// first time the session needs a statement or the schema: all classes are
// introspected first, then foreign keys and relations are resolved across
// classes, then statement text is generated.
//
// Per-class operations are reached through the type-erased MappingOps, so
// the session can flush, load and finish objects knowing only their slot.
//
// ============================================================================

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use super::Session;
use super::statements::{SelectSql, quote};
use crate::action::{self, prepare::PrepareStatements};
use crate::connection::SqlConnection;
use crate::core::{DboError, FieldInfo, FieldKind, RelationType, Result, SetInfo, SqlValue};
use crate::dbo::{CollectionEdit, DboKey};
use crate::persist::Persist;
use crate::sql_traits::nullable;

/// Table layout of one mapped class.
#[derive(Debug, Clone, Default)]
pub struct MappingInfo {
    pub table_name: String,
    pub surrogate_id: Option<String>,
    pub version_field: Option<String>,
    /// Columns in declaration order, excluding surrogate id and version.
    pub fields: Vec<FieldInfo>,
    pub sets: Vec<SetInfo>,
    pub(crate) statements: Vec<String>,
    pub(crate) set_selects: Vec<SelectSql>,
}

impl MappingInfo {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    pub fn natural_id_field(&self) -> Option<usize> {
        self.fields.iter().position(FieldInfo::is_natural_id)
    }

    /// Name of the primary key column.
    pub fn id_name(&self) -> &str {
        match (&self.surrogate_id, self.natural_id_field()) {
            (Some(name), _) => name,
            (None, Some(i)) => &self.fields[i].name,
            (None, None) => "id",
        }
    }

    /// Column type of the primary key, without `not null`.
    pub fn id_type(&self, conn: &dyn SqlConnection) -> String {
        match self.natural_id_field() {
            Some(i) if self.surrogate_id.is_none() => nullable(&self.fields[i].sql_type).to_string(),
            _ => conn.long_long_type().to_string(),
        }
    }

    pub fn is_versioned(&self) -> bool {
        self.version_field.is_some()
    }

    /// Row position of the version column in a select.
    pub fn version_column(&self) -> Option<usize> {
        self.version_field
            .as_ref()
            .map(|_| if self.surrogate_id.is_some() { 1 } else { 0 })
    }

    /// Row position of the first declared field in a select.
    pub fn first_field_column(&self) -> usize {
        self.surrogate_id.iter().count() + self.version_field.iter().count()
    }

    /// Row position of the primary key in a select.
    pub fn id_column(&self) -> Option<usize> {
        if self.surrogate_id.is_some() {
            Some(0)
        } else {
            self.natural_id_field().map(|i| self.first_field_column() + i)
        }
    }

    /// Quoted select list, optionally qualified with the table name.
    pub fn select_columns(&self, qualified: bool) -> Vec<String> {
        let prefix = if qualified {
            format!("{}.", quote(&self.table_name))
        } else {
            String::new()
        };

        self.surrogate_id
            .iter()
            .chain(self.version_field.iter())
            .chain(self.fields.iter().map(|f| &f.name))
            .map(|name| format!("{}{}", prefix, quote(name)))
            .collect()
    }

    /// Id value found in a selected row.
    pub fn id_from_row(&self, row: &[SqlValue]) -> Result<SqlValue> {
        let column = self.id_column().ok_or_else(|| {
            DboError::Mapping(format!("table '{}' has no primary key", self.table_name))
        })?;
        row.get(column).cloned().ok_or_else(|| {
            DboError::Consistency(format!("row of '{}' is missing its id column", self.table_name))
        })
    }
}

pub(crate) struct Mapping {
    pub type_id: TypeId,
    pub table_name: String,
    pub ops: Arc<dyn MappingOps>,
    pub info: MappingInfo,
}

/// Per-class operations, with the class type erased.
pub(crate) trait MappingOps {
    fn type_name(&self) -> &'static str;

    fn init_schema(&self, session: &Session, mapping: usize) -> Result<MappingInfo>;

    /// Binds relation fields of a newly added object to its slot.
    fn bind(&self, session: &mut Session, index: usize) -> Result<()>;

    fn save(&self, session: &mut Session, index: usize) -> Result<()>;

    fn load(&self, session: &mut Session, index: usize) -> Result<()>;

    fn load_row(&self, session: &mut Session, index: usize, row: &[SqlValue]) -> Result<()>;

    /// Returns true when collection edits are still pending afterwards.
    fn transaction_done(&self, session: &mut Session, index: usize, success: bool) -> Result<bool>;

    fn edit_collection(
        &self,
        session: &mut Session,
        index: usize,
        set_index: usize,
        edit: CollectionEdit,
    ) -> Result<()>;

    fn set_reciproce(
        &self,
        session: &mut Session,
        index: usize,
        join_name: &str,
        owner: Option<(DboKey, usize)>,
    ) -> Result<()>;

    fn natural_id(&self, session: &mut Session, index: usize) -> Result<Option<SqlValue>>;

    fn to_values(&self, session: &mut Session, index: usize) -> Result<Vec<SqlValue>>;

    fn set_value(&self, session: &mut Session, index: usize, field: usize, value: SqlValue) -> Result<()>;
}

pub(crate) struct TypedMapping<C>(PhantomData<fn() -> C>);

impl<C> TypedMapping<C> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C: Persist> MappingOps for TypedMapping<C> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn init_schema(&self, session: &Session, mapping: usize) -> Result<MappingInfo> {
        action::init_schema::init_mapping::<C>(session, mapping)
    }

    fn bind(&self, session: &mut Session, index: usize) -> Result<()> {
        action::session_add::bind_object::<C>(session, index)
    }

    fn save(&self, session: &mut Session, index: usize) -> Result<()> {
        action::save::save_object::<C>(session, index)
    }

    fn load(&self, session: &mut Session, index: usize) -> Result<()> {
        action::load::load_object::<C>(session, index)
    }

    fn load_row(&self, session: &mut Session, index: usize, row: &[SqlValue]) -> Result<()> {
        action::load::load_row::<C>(session, index, row)
    }

    fn transaction_done(&self, session: &mut Session, index: usize, success: bool) -> Result<bool> {
        action::transaction_done::collections_done::<C>(session, index, success)
    }

    fn edit_collection(
        &self,
        session: &mut Session,
        index: usize,
        set_index: usize,
        edit: CollectionEdit,
    ) -> Result<()> {
        action::reciproce::edit_collection::<C>(session, index, set_index, edit)
    }

    fn set_reciproce(
        &self,
        session: &mut Session,
        index: usize,
        join_name: &str,
        owner: Option<(DboKey, usize)>,
    ) -> Result<()> {
        action::reciproce::set_reciproce::<C>(session, index, join_name, owner)
    }

    fn natural_id(&self, session: &mut Session, index: usize) -> Result<Option<SqlValue>> {
        action::values::natural_id::<C>(session, index)
    }

    fn to_values(&self, session: &mut Session, index: usize) -> Result<Vec<SqlValue>> {
        action::values::to_values::<C>(session, index)
    }

    fn set_value(&self, session: &mut Session, index: usize, field: usize, value: SqlValue) -> Result<()> {
        action::values::from_value::<C>(session, index, field, value)
    }
}

/// Resolves cross-class references and generates statement text for every
/// mapping. Runs once, after all classes were introspected.
pub(crate) fn resolve_mappings(infos: &mut [MappingInfo], conn: &dyn SqlConnection) -> Result<()> {
    resolve_foreign_keys(infos, conn)?;
    resolve_sets(infos)?;

    for i in 0..infos.len() {
        let (statements, selects) = {
            let mut prepare = PrepareStatements::new(infos, i);
            prepare.visit_self(conn);
            prepare.visit_collections()?;
            prepare.finish()
        };
        infos[i].statements = statements;
        infos[i].set_selects = selects;
    }

    Ok(())
}

fn resolve_foreign_keys(infos: &mut [MappingInfo], conn: &dyn SqlConnection) -> Result<()> {
    let mut resolved = Vec::new();

    for (i, info) in infos.iter().enumerate() {
        for (f, field) in info.fields.iter().enumerate() {
            if let FieldKind::ForeignKey {
                target_mapping,
                prefix,
                constraints,
                ..
            } = &field.kind
            {
                let target = &infos[*target_mapping];
                let name = format!("{}_{}", prefix, target.id_name());
                let mut sql_type = target.id_type(conn);
                if constraints.contains(crate::core::FkConstraints::NOT_NULL) {
                    sql_type = crate::sql_traits::not_null(&sql_type);
                }
                resolved.push((i, f, name, sql_type));
            }
        }
    }

    for (i, f, name, sql_type) in resolved {
        if infos[i].fields.iter().any(|other| other.name == name) {
            return Err(DboError::Mapping(format!(
                "column '{}' declared twice in table '{}'",
                name, infos[i].table_name
            )));
        }
        infos[i].fields[f].name = name;
        infos[i].fields[f].sql_type = sql_type;
    }

    Ok(())
}

/// Join table column of the other side of a many-to-many relation: the
/// reciprocal declaration's join id, or `<table>_id`.
fn many_to_many_join_id(infos: &[MappingInfo], owner: usize, set: usize) -> String {
    let info = &infos[owner].sets[set];
    let target = &infos[info.target_mapping];

    target
        .sets
        .iter()
        .enumerate()
        .filter(|(j, other)| {
            other.relation == RelationType::ManyToMany
                && other.target_mapping == owner
                && other.join_name == info.join_name
                && !(info.target_mapping == owner && *j == set)
        })
        .find_map(|(_, other)| other.join_id.clone())
        .unwrap_or_else(|| format!("{}_id", target.table_name))
}

fn resolve_sets(infos: &mut [MappingInfo]) -> Result<()> {
    let mut resolved = Vec::new();

    for (i, info) in infos.iter().enumerate() {
        let mut statement_index = super::statements::FIRST_SQL_SELECT_SET;

        for (s, set) in info.sets.iter().enumerate() {
            let (self_column, other_column) = match set.relation {
                RelationType::ManyToOne => {
                    let target = &infos[set.target_mapping];
                    let column = target
                        .fields
                        .iter()
                        .find_map(|f| match &f.kind {
                            FieldKind::ForeignKey {
                                target_mapping,
                                prefix,
                                ..
                            } if *target_mapping == i && *prefix == set.join_name => Some(f.name.clone()),
                            _ => None,
                        })
                        .ok_or_else(|| {
                            DboError::Mapping(format!(
                                "relation from '{}': table '{}' has no belongs_to '{}'",
                                info.table_name, target.table_name, set.join_name
                            ))
                        })?;
                    (column, String::new())
                }
                RelationType::ManyToMany => {
                    let self_column = set
                        .join_id
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", info.table_name));
                    let other_column = many_to_many_join_id(infos, i, s);
                    if self_column == other_column {
                        return Err(DboError::Mapping(format!(
                            "join table '{}' needs distinct join ids for both sides, got '{}'",
                            set.join_name, self_column
                        )));
                    }
                    (self_column, other_column)
                }
            };

            resolved.push((i, s, self_column, other_column, statement_index));
            statement_index += set.statement_count();
        }
    }

    for (i, s, self_column, other_column, statement_index) in resolved {
        let set = &mut infos[i].sets[s];
        set.self_column = self_column;
        set.other_column = other_column;
        set.statement_index = statement_index;
    }

    Ok(())
}

/// Join table name derived from both table names.
pub(crate) fn create_join_name(table: &str, other: &str) -> String {
    if table <= other {
        format!("{}_{}", table, other)
    } else {
        format!("{}_{}", other, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FkConstraints;

    fn info(table: &str) -> MappingInfo {
        let mut info = MappingInfo::new(table);
        info.surrogate_id = Some("id".into());
        info.version_field = Some("version".into());
        info
    }

    fn set(target: usize, table: &str, relation: RelationType, join: &str) -> SetInfo {
        SetInfo {
            target_mapping: target,
            target_table: table.into(),
            relation,
            join_name: join.into(),
            join_id: None,
            fk_constraints: FkConstraints::NONE,
            weak: false,
            self_column: String::new(),
            other_column: String::new(),
            statement_index: 0,
        }
    }

    #[test]
    fn test_row_layout() {
        let mut user = info("user");
        user.fields.push(FieldInfo::new("name", "text not null", FieldKind::Value));
        assert_eq!(user.first_field_column(), 2);
        assert_eq!(user.version_column(), Some(1));
        assert_eq!(user.id_column(), Some(0));
        assert_eq!(
            user.select_columns(true),
            vec!["\"user\".\"id\"", "\"user\".\"version\"", "\"user\".\"name\""]
        );
    }

    #[test]
    fn test_natural_id_layout() {
        let mut country = MappingInfo::new("country");
        country.version_field = Some("version".into());
        country.fields.push(FieldInfo::new("code", "varchar(2) not null", FieldKind::NaturalId));
        assert_eq!(country.id_name(), "code");
        assert_eq!(country.id_column(), Some(1));
        assert_eq!(country.version_column(), Some(0));
    }

    #[test]
    fn test_many_to_one_resolves_foreign_key_column() {
        let conn = crate::connection::Sqlite3::open_in_memory().unwrap();
        let mut user = info("user");
        user.sets.push(set(1, "post", RelationType::ManyToOne, "author"));
        let mut post = info("post");
        post.fields.push(FieldInfo::new(
            "",
            "",
            FieldKind::ForeignKey {
                target_mapping: 0,
                target_table: "user".into(),
                prefix: "author".into(),
                constraints: FkConstraints::NONE,
            },
        ));

        let mut infos = vec![user, post];
        resolve_mappings(&mut infos, &conn).unwrap();
        assert_eq!(infos[1].fields[0].name, "author_id");
        assert_eq!(infos[1].fields[0].sql_type, "integer");
        assert_eq!(infos[0].sets[0].self_column, "author_id");
        assert_eq!(infos[0].sets[0].statement_index, 5);
    }

    #[test]
    fn test_many_to_many_columns() {
        let conn = crate::connection::Sqlite3::open_in_memory().unwrap();
        let mut post = info("post");
        post.sets.push(set(1, "tag", RelationType::ManyToMany, "post_tag"));
        let mut tag = info("tag");
        tag.sets.push(set(0, "post", RelationType::ManyToMany, "post_tag"));

        let mut infos = vec![post, tag];
        resolve_mappings(&mut infos, &conn).unwrap();
        assert_eq!(infos[0].sets[0].self_column, "post_id");
        assert_eq!(infos[0].sets[0].other_column, "tag_id");
        assert_eq!(infos[1].sets[0].self_column, "tag_id");
        assert_eq!(infos[1].sets[0].other_column, "post_id");
    }

    #[test]
    fn test_self_referencing_many_to_many_needs_join_ids() {
        let conn = crate::connection::Sqlite3::open_in_memory().unwrap();
        let mut person = info("person");
        person.sets.push(set(0, "person", RelationType::ManyToMany, "friends"));
        let mut infos = vec![person];
        assert!(matches!(
            resolve_mappings(&mut infos, &conn),
            Err(DboError::Mapping(_))
        ));

        let mut person = info("person");
        let mut a = set(0, "person", RelationType::ManyToMany, "follows");
        a.join_id = Some("follower_id".into());
        let mut b = set(0, "person", RelationType::ManyToMany, "follows");
        b.join_id = Some("followed_id".into());
        person.sets.push(a);
        person.sets.push(b);
        let mut infos = vec![person];
        resolve_mappings(&mut infos, &conn).unwrap();
        assert_eq!(infos[0].sets[0].self_column, "follower_id");
        assert_eq!(infos[0].sets[0].other_column, "followed_id");
        assert_eq!(infos[0].sets[1].self_column, "followed_id");
        assert_eq!(infos[0].sets[1].other_column, "follower_id");
        assert_eq!(infos[0].sets[1].statement_index, 8);
    }

    #[test]
    fn test_missing_belongs_to_is_mapping_error() {
        let conn = crate::connection::Sqlite3::open_in_memory().unwrap();
        let mut user = info("user");
        user.sets.push(set(1, "post", RelationType::ManyToOne, "author"));
        let mut infos = vec![user, info("post")];
        assert!(matches!(
            resolve_mappings(&mut infos, &conn),
            Err(DboError::Mapping(_))
        ));
    }

    #[test]
    fn test_join_name_is_ordered() {
        assert_eq!(create_join_name("tag", "post"), "post_tag");
        assert_eq!(create_join_name("post", "tag"), "post_tag");
    }
}
