use std::collections::HashSet;

use crate::connection::SqlConnection;
use crate::core::{FieldKind, FkConstraints, RelationType, SetInfo};
use crate::session::MappingInfo;
use crate::session::statements::quote;
use crate::sql_traits::{not_null, nullable};

/// Generates `create table` statements.
///
/// Tables referenced through `belongs_to` are created before the tables
/// referencing them, and each join table exactly once, after both of its
/// sides. `tables_created` also covers tables still being generated, which
/// ends recursion over cyclic references.
pub(crate) struct CreateSchema<'a> {
    infos: &'a [MappingInfo],
    conn: &'a dyn SqlConnection,
    tables_created: HashSet<String>,
    statements: Vec<String>,
}

impl<'a> CreateSchema<'a> {
    pub fn new(infos: &'a [MappingInfo], conn: &'a dyn SqlConnection) -> Self {
        Self {
            infos,
            conn,
            tables_created: HashSet::new(),
            statements: Vec::new(),
        }
    }

    pub fn visit(&mut self, mapping: usize) {
        let infos = self.infos;
        let info = &infos[mapping];
        if !self.tables_created.insert(info.table_name.clone()) {
            return;
        }

        for field in &info.fields {
            if let FieldKind::ForeignKey { target_mapping, .. } = field.kind {
                if target_mapping != mapping {
                    self.visit(target_mapping);
                }
            }
        }

        self.visit_self(info);

        for set in info.sets.iter().filter(|s| s.relation == RelationType::ManyToMany) {
            if set.target_mapping != mapping {
                self.visit(set.target_mapping);
            }
            if self.tables_created.insert(set.join_name.clone()) {
                self.create_join_table(info, set);
            }
        }
    }

    fn visit_self(&mut self, info: &MappingInfo) {
        let mut columns = Vec::new();

        if let Some(id) = &info.surrogate_id {
            columns.push(format!(
                "  {} {} primary key {}",
                quote(id),
                self.conn.autoincrement_type(),
                self.conn.autoincrement_sql()
            ));
        }
        if let Some(version) = &info.version_field {
            columns.push(format!("  {} integer not null", quote(version)));
        }
        for field in &info.fields {
            columns.push(format!("  {} {}", quote(&field.name), field.sql_type));
        }

        if let Some(i) = info.natural_id_field() {
            columns.push(format!("  primary key ({})", quote(&info.fields[i].name)));
        }

        for field in &info.fields {
            if let FieldKind::ForeignKey {
                target_mapping,
                prefix,
                constraints,
                ..
            } = &field.kind
            {
                let target = &self.infos[*target_mapping];
                columns.push(format!(
                    "  constraint {} foreign key ({}) references {} ({}){}",
                    quote(&format!("fk_{}_{}", info.table_name, prefix)),
                    quote(&field.name),
                    quote(&target.table_name),
                    quote(target.id_name()),
                    constraints.referential_actions()
                ));
            }
        }

        self.statements.push(format!(
            "create table {} (\n{}\n)",
            quote(&info.table_name),
            columns.join(",\n")
        ));
    }

    fn create_join_table(&mut self, info: &MappingInfo, set: &SetInfo) {
        let target = &self.infos[set.target_mapping];
        let actions = if set.fk_constraints.is_empty() {
            FkConstraints::ON_DELETE_CASCADE.referential_actions()
        } else {
            set.fk_constraints.referential_actions()
        };
        let join_table = quote(&set.join_name);

        let sides = [
            (&set.self_column, info, "key1"),
            (&set.other_column, target, "key2"),
        ];

        let mut columns = Vec::new();
        for (column, side, _) in &sides {
            columns.push(format!(
                "  {} {}",
                quote(column),
                not_null(nullable(&side.id_type(self.conn)))
            ));
        }
        columns.push(format!(
            "  primary key ({}, {})",
            quote(&set.self_column),
            quote(&set.other_column)
        ));
        for (column, side, key) in &sides {
            columns.push(format!(
                "  constraint {} foreign key ({}) references {} ({}){}",
                quote(&format!("fk_{}_{}", set.join_name, key)),
                quote(column),
                quote(&side.table_name),
                quote(side.id_name()),
                actions
            ));
        }

        self.statements.push(format!(
            "create table {} (\n{}\n)",
            join_table,
            columns.join(",\n")
        ));

        for (column, _, _) in &sides {
            self.statements.push(format!(
                "create index {} on {} ({})",
                quote(&format!("{}_{}", set.join_name, column)),
                join_table,
                quote(column)
            ));
        }
    }

    pub fn finish(self) -> Vec<String> {
        self.statements
    }
}

/// Generates `drop table` statements: tables referencing a table and its
/// join tables are dropped before it.
pub(crate) struct DropSchema<'a> {
    infos: &'a [MappingInfo],
    tables_dropped: HashSet<String>,
    statements: Vec<String>,
}

impl<'a> DropSchema<'a> {
    pub fn new(infos: &'a [MappingInfo]) -> Self {
        Self {
            infos,
            tables_dropped: HashSet::new(),
            statements: Vec::new(),
        }
    }

    pub fn visit(&mut self, mapping: usize) {
        let infos = self.infos;
        let info = &infos[mapping];
        if !self.tables_dropped.insert(info.table_name.clone()) {
            return;
        }

        for (other, other_info) in infos.iter().enumerate() {
            if other == mapping {
                continue;
            }
            let references = other_info.fields.iter().any(|f| {
                matches!(f.kind, FieldKind::ForeignKey { target_mapping, .. } if target_mapping == mapping)
            });
            if references {
                self.visit(other);
            }
        }

        let join_tables = infos
            .iter()
            .enumerate()
            .flat_map(|(owner, owner_info)| {
                owner_info
                    .sets
                    .iter()
                    .filter(move |s| {
                        s.relation == RelationType::ManyToMany
                            && (owner == mapping || s.target_mapping == mapping)
                    })
                    .map(|s| s.join_name.clone())
            })
            .collect::<Vec<_>>();

        for join_table in join_tables {
            if self.tables_dropped.insert(join_table.clone()) {
                self.statements.push(format!("drop table {}", quote(&join_table)));
            }
        }

        self.statements.push(format!("drop table {}", quote(&info.table_name)));
    }

    pub fn finish(self) -> Vec<String> {
        self.statements
    }
}
