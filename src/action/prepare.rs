use crate::connection::SqlConnection;
use crate::core::{DboError, RelationType, Result};
use crate::session::MappingInfo;
use crate::session::statements::{SelectSql, quote};

/// Generates the statement text of one mapping.
///
/// The self pass produces, at fixed indices, insert, update, delete,
/// versioned delete and select-by-id. The collections pass appends, per
/// relation in declaration order, a select (plus join table insert and
/// delete for many-to-many).
pub(crate) struct PrepareStatements<'a> {
    infos: &'a [MappingInfo],
    info: &'a MappingInfo,
    statements: Vec<String>,
    selects: Vec<SelectSql>,
}

impl<'a> PrepareStatements<'a> {
    pub fn new(infos: &'a [MappingInfo], mapping: usize) -> Self {
        Self {
            infos,
            info: &infos[mapping],
            statements: Vec::new(),
            selects: Vec::new(),
        }
    }

    fn id_condition(&self) -> String {
        format!("{} = ?", quote(self.info.id_name()))
    }

    fn version_condition(&self) -> Option<String> {
        self.info
            .version_field
            .as_ref()
            .map(|v| format!("{} = ?", quote(v)))
    }

    pub fn visit_self(&mut self, conn: &dyn SqlConnection) {
        let info = self.info;
        let table = quote(&info.table_name);

        let columns: Vec<String> = info
            .version_field
            .iter()
            .chain(info.fields.iter().map(|f| &f.name))
            .map(|name| quote(name))
            .collect();

        // insert
        let insert = if columns.is_empty() {
            format!("insert into {} default values", table)
        } else {
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "insert into {} ({}) values ({})",
                table,
                columns.join(", "),
                placeholders
            )
        };
        let suffix = match &info.surrogate_id {
            Some(id) => conn.autoincrement_insert_suffix(id),
            None => String::new(),
        };
        self.statements.push(format!("{}{}", insert, suffix));

        // update
        let assignments: Vec<String> = if columns.is_empty() {
            vec![format!("{0} = {0}", quote(info.id_name()))]
        } else {
            columns.iter().map(|c| format!("{} = ?", c)).collect()
        };
        let mut update = format!(
            "update {} set {} where {}",
            table,
            assignments.join(", "),
            self.id_condition()
        );
        if let Some(version) = self.version_condition() {
            update.push_str(" and ");
            update.push_str(&version);
        }
        self.statements.push(update);

        // delete, versioned delete
        let delete = format!("delete from {} where {}", table, self.id_condition());
        let delete_versioned = match self.version_condition() {
            Some(version) => format!("{} and {}", delete, version),
            None => delete.clone(),
        };
        self.statements.push(delete);
        self.statements.push(delete_versioned);

        // select by id
        let select = SelectSql::new(info.select_columns(false), table).condition(self.id_condition());
        self.statements.push(select.to_sql());
    }

    pub fn visit_collections(&mut self) -> Result<()> {
        for set in &self.info.sets {
            let target = &self.infos[set.target_mapping];
            let target_table = quote(&target.table_name);

            match set.relation {
                RelationType::ManyToOne => {
                    let select = SelectSql::new(target.select_columns(true), target_table.clone())
                        .condition(format!("{}.{} = ?", target_table, quote(&set.self_column)))
                        .order_by(format!("{}.{}", target_table, quote(target.id_name())));
                    self.statements.push(select.to_sql());
                    self.selects.push(select);
                }
                RelationType::ManyToMany => {
                    if target.id_column().is_none() {
                        return Err(DboError::Mapping(format!(
                            "table '{}' has no primary key to join on",
                            target.table_name
                        )));
                    }
                    let join_table = quote(&set.join_name);
                    let select = SelectSql::new(target.select_columns(true), target_table.clone())
                        .join(format!(
                            "{} on {}.{} = {}.{}",
                            join_table,
                            join_table,
                            quote(&set.other_column),
                            target_table,
                            quote(target.id_name())
                        ))
                        .condition(format!("{}.{} = ?", join_table, quote(&set.self_column)))
                        .order_by(format!("{}.{}", target_table, quote(target.id_name())));
                    self.statements.push(select.to_sql());
                    self.selects.push(select);

                    self.statements.push(format!(
                        "insert into {} ({}, {}) values (?, ?)",
                        join_table,
                        quote(&set.self_column),
                        quote(&set.other_column)
                    ));
                    self.statements.push(format!(
                        "delete from {} where {} = ? and {} = ?",
                        join_table,
                        quote(&set.self_column),
                        quote(&set.other_column)
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn finish(self) -> (Vec<String>, Vec<SelectSql>) {
        (self.statements, self.selects)
    }
}
