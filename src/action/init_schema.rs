use crate::core::{DboError, FieldInfo, FieldKind, RelationType, Result, SetInfo};
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef, WeakPtrRef};
use crate::session::{MappingInfo, Session, mapping::create_join_name};
use crate::sql_traits::SqlValueTraits;

/// Collects the field and relation descriptors of one class.
///
/// Foreign key columns are recorded by name prefix only; their final names
/// and types are resolved once every class has been introspected.
pub(crate) struct InitSchema<'a> {
    session: &'a Session,
    info: MappingInfo,
}

impl<'a> InitSchema<'a> {
    fn new(session: &'a Session, mapping: usize) -> Self {
        Self {
            session,
            info: MappingInfo::new(session.mapping_table(mapping)),
        }
    }

    fn push_set<C: Persist>(
        &mut self,
        relation: RelationType,
        join_name: &str,
        join_id: Option<&str>,
        constraints: crate::core::FkConstraints,
        weak: bool,
    ) -> Result<()> {
        let target_mapping = self.session.mapping_index::<C>()?;
        let target_table = self.session.mapping_table(target_mapping).to_string();

        let join_name = match (relation, join_name.is_empty()) {
            (_, false) => join_name.to_string(),
            (RelationType::ManyToOne, true) => self.info.table_name.clone(),
            (RelationType::ManyToMany, true) => create_join_name(&self.info.table_name, &target_table),
        };

        self.info.sets.push(SetInfo {
            target_mapping,
            target_table,
            relation,
            join_name,
            join_id: join_id.map(str::to_string),
            fk_constraints: constraints,
            weak,
            self_column: String::new(),
            other_column: String::new(),
            statement_index: 0,
        });
        Ok(())
    }
}

impl Action for InitSchema<'_> {
    fn act_id<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        if self.info.natural_id_field().is_some() {
            return Err(DboError::Mapping(format!(
                "table '{}' declares more than one id",
                self.info.table_name
            )));
        }
        let sql_type = V::sql_type(self.session.connection(), field.size);
        self.info
            .fields
            .push(FieldInfo::new(field.name, sql_type, FieldKind::NaturalId));
        Ok(())
    }

    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        let sql_type = V::sql_type(self.session.connection(), field.size);
        self.info
            .fields
            .push(FieldInfo::new(field.name, sql_type, FieldKind::Value));
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        let target_mapping = self.session.mapping_index::<C>()?;
        self.info.fields.push(FieldInfo::new(
            "",
            "",
            FieldKind::ForeignKey {
                target_mapping,
                target_table: self.session.mapping_table(target_mapping).to_string(),
                prefix: field.name.to_string(),
                constraints: field.constraints,
            },
        ));
        Ok(())
    }

    fn act_weak_ptr<C: Persist>(&mut self, field: WeakPtrRef<'_, C>) -> Result<()> {
        self.push_set::<C>(
            RelationType::ManyToOne,
            field.join_name,
            None,
            crate::core::FkConstraints::NONE,
            true,
        )
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        self.push_set::<C>(
            field.relation,
            field.join_name,
            field.join_id,
            field.constraints,
            false,
        )
    }

    fn is_schema(&self) -> bool {
        true
    }
}

/// Introspects class `C` mapped at index `mapping`.
pub(crate) fn init_mapping<C: Persist>(session: &Session, mapping: usize) -> Result<MappingInfo> {
    let mut action = InitSchema::new(session, mapping);
    let mut prototype = C::default();
    prototype.persist(&mut action)?;

    let mut info = action.info;
    info.version_field = C::version_field().map(str::to_string);
    info.surrogate_id = match info.natural_id_field() {
        Some(_) => None,
        None => C::surrogate_id_field().map(str::to_string),
    };

    if info.surrogate_id.is_none() && info.natural_id_field().is_none() {
        return Err(DboError::Mapping(format!(
            "table '{}' has neither a surrogate nor a natural id",
            info.table_name
        )));
    }

    Ok(info)
}
