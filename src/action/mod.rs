// ============================================================================
// Actions
// ============================================================================
//
// Each action walks a class's `persist()` declaration for one concern:
//
// - init_schema:      collect field and relation descriptors
// - prepare:          generate statement text (from the descriptors)
// - schema:           create / drop tables (from the descriptors)
// - save:             insert or update one object, then its join tables
// - load:             read one object from a selected row
// - session_add:      bind relation fields to their owning object
// - transaction_done: settle collection edits after commit or rollback
// - reciproce:        point a belongs_to at an owner, buffer collection edits
// - values:           generic access to column values
// - json:             write an object and its relations as JSON
//
// ============================================================================

pub(crate) mod init_schema;
pub(crate) mod json;
pub(crate) mod load;
pub(crate) mod prepare;
pub(crate) mod reciproce;
pub(crate) mod save;
pub(crate) mod schema;
pub(crate) mod session_add;
pub(crate) mod transaction_done;
pub(crate) mod values;
