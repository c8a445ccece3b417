//! Schema registry: an immutable, atomically swapped snapshot of all form
//! definitions.
//!
//! Every component reads through [`SchemaRegistry::snapshot`] instead of
//! querying definition tables live. [`SchemaRegistry::refresh`] is the only
//! mutator: it loads everything, builds a fresh [`SchemaSnapshot`] with a
//! bumped generation and swaps it in under a write lock. Readers clone the
//! `Arc` and observe either the old or the new generation, never a partial
//! one. A snapshot must not be held across a refresh boundary when fresh
//! data is wanted — call `snapshot()` again.

use crate::error::{Result, StoreError};
use disclosure_db_core::schema::{
    AttributePrompt, AttributeType, Choice, ColumnDef, ColumnView, Organization, TableDef,
    TableView,
};
use parking_lot::RwLock;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Immutable view of all form definitions at one generation.
#[derive(Debug, Default)]
pub struct SchemaSnapshot {
    pub generation: u64,
    root_form: String,
    table_defs: HashMap<i64, Arc<TableDef>>,
    table_defs_by_name: HashMap<String, Arc<TableDef>>,
    column_defs_by_name: HashMap<String, Arc<ColumnDef>>,
    column_defs_by_id: HashMap<i64, Arc<ColumnDef>>,
    choices_by_set: HashMap<i64, Vec<Choice>>,
    table_views: HashMap<i64, TableView>,
    organizations: HashMap<i64, Organization>,
}

impl SchemaSnapshot {
    /// Table definition by id.
    pub fn table_def(&self, id: i64) -> Option<&Arc<TableDef>> {
        self.table_defs.get(&id)
    }

    /// Table definition by form name.
    pub fn table_def_by_name(&self, name: &str) -> Option<&Arc<TableDef>> {
        self.table_defs_by_name.get(name)
    }

    /// Column definition by field name. Field names are globally unique
    /// across the schema.
    pub fn column_def(&self, name: &str) -> Option<&Arc<ColumnDef>> {
        self.column_defs_by_name.get(name)
    }

    /// Column definition by id.
    pub fn column_def_by_id(&self, id: i64) -> Option<&Arc<ColumnDef>> {
        self.column_defs_by_id.get(&id)
    }

    /// The table definition a column owns (the table the column is defined
    /// on, not the one it references).
    pub fn owning_table_def(&self, column: &ColumnDef) -> Option<&Arc<TableDef>> {
        self.table_defs.get(&column.table_def_id)
    }

    /// The nested table definition a Form/FormOrNull/Multiple column
    /// references.
    pub fn sub_table_def(&self, column: &ColumnDef) -> Option<&Arc<TableDef>> {
        column.attribute_type_id.and_then(|id| self.table_defs.get(&id))
    }

    /// Choice list of a choice set, ordered.
    pub fn choices(&self, set_id: i64) -> &[Choice] {
        self.choices_by_set
            .get(&set_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Choice list backing a column, if it has one.
    pub fn column_choices(&self, column: &ColumnDef) -> &[Choice] {
        column
            .choice_set_id
            .map(|set| self.choices(set))
            .unwrap_or(&[])
    }

    /// Published schema revision by id.
    pub fn table_view(&self, id: i64) -> Option<&TableView> {
        self.table_views.get(&id)
    }

    /// Organization by nz_id.
    pub fn organization(&self, nz_id: i64) -> Option<&Organization> {
        self.organizations.get(&nz_id)
    }

    /// All organizations.
    pub fn organizations(&self) -> &HashMap<i64, Organization> {
        &self.organizations
    }

    /// The configured base form name.
    pub fn root_form(&self) -> &str {
        &self.root_form
    }

    /// The base form's table definition.
    pub fn root_table_def(&self) -> Result<&Arc<TableDef>> {
        self.table_defs_by_name
            .get(&self.root_form)
            .ok_or_else(|| StoreError::not_found(format!("root form '{}'", self.root_form)))
    }

    /// The base form's physical table name.
    pub fn root_table(&self) -> Result<String> {
        Ok(self.root_table_def()?.physical_name())
    }

    /// Walk a table definition recursively, collecting every sub-form
    /// definition reachable through Form/FormOrNull/Multiple columns.
    /// The root is not included; order is depth-first in schema order.
    pub fn collect_sub_table_defs(&self, root: &TableDef) -> Vec<Arc<TableDef>> {
        let mut out = Vec::new();
        self.walk_sub_tables(root, &mut out);
        out
    }

    fn walk_sub_tables(&self, td: &TableDef, out: &mut Vec<Arc<TableDef>>) {
        for column in &td.columns {
            if column.attribute_type.is_recursive() {
                if let Some(sub) = self.sub_table_def(column) {
                    out.push(sub.clone());
                    self.walk_sub_tables(sub, out);
                }
            }
        }
    }
}

/// Lock-guarded holder of the current [`SchemaSnapshot`].
pub struct SchemaRegistry {
    root_form: String,
    snapshot: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaRegistry {
    /// Create a registry for the given base form. The initial snapshot is
    /// empty (generation 0); call [`refresh`](Self::refresh) before serving.
    pub fn new(root_form: impl Into<String>) -> Self {
        let root_form = root_form.into();
        let empty = SchemaSnapshot {
            root_form: root_form.clone(),
            ..SchemaSnapshot::default()
        };
        SchemaRegistry {
            root_form,
            snapshot: RwLock::new(Arc::new(empty)),
        }
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.snapshot.read().clone()
    }

    /// Reload every definition table and swap in a fresh snapshot.
    pub async fn refresh(&self, pool: &PgPool) -> Result<Arc<SchemaSnapshot>> {
        let generation = self.snapshot.read().generation + 1;
        let snapshot = Arc::new(load_snapshot(pool, &self.root_form, generation).await?);
        *self.snapshot.write() = snapshot.clone();
        info!(
            generation,
            table_defs = snapshot.table_defs.len(),
            column_defs = snapshot.column_defs_by_name.len(),
            organizations = snapshot.organizations.len(),
            "schema registry refreshed"
        );
        Ok(snapshot)
    }
}

async fn load_snapshot(
    pool: &PgPool,
    root_form: &str,
    generation: u64,
) -> Result<SchemaSnapshot> {
    // Prompts and views keyed by owning column, attached while assembling
    // column definitions below.
    let mut prompts_by_column: HashMap<i64, Vec<AttributePrompt>> = HashMap::new();
    for row in sqlx::query(
        "SELECT id, column_def_id, value, role FROM dd_attribute_prompt ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    {
        let prompt = AttributePrompt {
            id: row.try_get("id")?,
            column_def_id: row.try_get("column_def_id")?,
            value: row.try_get("value")?,
            role: row.try_get("role")?,
        };
        prompts_by_column
            .entry(prompt.column_def_id)
            .or_default()
            .push(prompt);
    }

    let mut views_by_column: HashMap<i64, Vec<ColumnView>> = HashMap::new();
    for row in sqlx::query(
        "SELECT id, column_def_id, constraint_value, constraint_view FROM dd_column_view ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    {
        let constraint_value: Option<serde_json::Value> = row.try_get("constraint_value")?;
        let view = ColumnView {
            id: row.try_get("id")?,
            column_def_id: row.try_get("column_def_id")?,
            constraint_value: constraint_value
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| StoreError::other(format!("bad constraint_value JSON: {e}")))?
                .unwrap_or_default(),
            constraint_view: row.try_get("constraint_view")?,
        };
        views_by_column.entry(view.column_def_id).or_default().push(view);
    }

    let mut columns_by_table: HashMap<i64, Vec<ColumnDef>> = HashMap::new();
    for row in sqlx::query(
        "SELECT id, name, table_def_id, attribute_type, attribute_type_id, choice_set_id \
         FROM dd_column_def ORDER BY id",
    )
    .fetch_all(pool)
    .await?
    {
        let id: i64 = row.try_get("id")?;
        let attribute_type: String = row.try_get("attribute_type")?;
        let attribute_type = AttributeType::parse(&attribute_type).ok_or_else(|| {
            StoreError::other(format!("unknown attribute type '{attribute_type}'"))
        })?;
        let column = ColumnDef {
            id,
            name: row.try_get("name")?,
            table_def_id: row.try_get("table_def_id")?,
            attribute_type,
            attribute_type_id: row.try_get("attribute_type_id")?,
            choice_set_id: row.try_get("choice_set_id")?,
            prompts: prompts_by_column.remove(&id).unwrap_or_default(),
            views: views_by_column.remove(&id).unwrap_or_default(),
        };
        columns_by_table.entry(column.table_def_id).or_default().push(column);
    }

    let mut table_defs = HashMap::new();
    let mut table_defs_by_name = HashMap::new();
    let mut column_defs_by_name = HashMap::new();
    let mut column_defs_by_id = HashMap::new();
    for row in sqlx::query("SELECT id, name, description, heritable FROM dd_table_def ORDER BY id")
        .fetch_all(pool)
        .await?
    {
        let id: i64 = row.try_get("id")?;
        let td = Arc::new(TableDef {
            id,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            heritable: row.try_get("heritable")?,
            columns: columns_by_table.remove(&id).unwrap_or_default(),
        });
        for column in &td.columns {
            let column = Arc::new(column.clone());
            column_defs_by_name.insert(column.name.clone(), column.clone());
            column_defs_by_id.insert(column.id, column);
        }
        table_defs_by_name.insert(td.name.clone(), td.clone());
        table_defs.insert(id, td);
    }

    let mut choices_by_set: HashMap<i64, Vec<Choice>> = HashMap::new();
    for row in sqlx::query(
        "SELECT id, choice_id, set_id, set_name, value, \"order\", language_code \
         FROM dd_choice ORDER BY set_id, \"order\", choice_id",
    )
    .fetch_all(pool)
    .await?
    {
        let choice = Choice {
            id: row.try_get("id")?,
            choice_id: row.try_get("choice_id")?,
            set_id: row.try_get("set_id")?,
            set_name: row.try_get("set_name")?,
            value: row.try_get("value")?,
            order: row.try_get("order")?,
            language_code: row.try_get("language_code")?,
        };
        choices_by_set.entry(choice.set_id).or_default().push(choice);
    }

    let mut table_views = HashMap::new();
    for row in sqlx::query(
        "SELECT id, table_def_id, name, revision, active FROM dd_table_view WHERE active = TRUE",
    )
    .fetch_all(pool)
    .await?
    {
        let view = TableView {
            id: row.try_get("id")?,
            table_def_id: row.try_get("table_def_id")?,
            name: row.try_get("name")?,
            revision: row.try_get("revision")?,
            active: row.try_get("active")?,
        };
        table_views.insert(view.id, view);
    }

    let mut organizations = HashMap::new();
    for row in sqlx::query(
        "SELECT nz_id, lei, legal_name, jurisdiction, sics_sector, sics_sub_sector, sics_industry \
         FROM dd_organization",
    )
    .fetch_all(pool)
    .await?
    {
        let org = Organization {
            nz_id: row.try_get("nz_id")?,
            lei: row.try_get("lei")?,
            legal_name: row.try_get("legal_name")?,
            jurisdiction: row.try_get("jurisdiction")?,
            sics_sector: row.try_get("sics_sector")?,
            sics_sub_sector: row.try_get("sics_sub_sector")?,
            sics_industry: row.try_get("sics_industry")?,
        };
        organizations.insert(org.nz_id, org);
    }

    Ok(SchemaSnapshot {
        generation,
        root_form: root_form.to_string(),
        table_defs,
        table_defs_by_name,
        column_defs_by_name,
        column_defs_by_id,
        choices_by_set,
        table_views,
        organizations,
    })
}

impl SchemaSnapshot {
    /// Build a snapshot directly from definitions, bypassing the database.
    ///
    /// Used by tests and tooling that operate on an in-memory schema; the
    /// server always goes through [`SchemaRegistry::refresh`].
    pub fn from_definitions(
        root_form: &str,
        defs: Vec<TableDef>,
        choices: Vec<Choice>,
        table_views: Vec<TableView>,
        organizations: Vec<Organization>,
    ) -> SchemaSnapshot {
        let mut table_defs = HashMap::new();
        let mut table_defs_by_name = HashMap::new();
        let mut column_defs_by_name = HashMap::new();
        let mut column_defs_by_id = HashMap::new();
        for td in defs {
            let td = Arc::new(td);
            for column in &td.columns {
                let column = Arc::new(column.clone());
                column_defs_by_name.insert(column.name.clone(), column.clone());
                column_defs_by_id.insert(column.id, column);
            }
            table_defs_by_name.insert(td.name.clone(), td.clone());
            table_defs.insert(td.id, td);
        }
        let mut choices_by_set: HashMap<i64, Vec<Choice>> = HashMap::new();
        for choice in choices {
            choices_by_set.entry(choice.set_id).or_default().push(choice);
        }
        SchemaSnapshot {
            generation: 1,
            root_form: root_form.to_string(),
            table_defs,
            table_defs_by_name,
            column_defs_by_name,
            column_defs_by_id,
            choices_by_set,
            table_views: table_views.into_iter().map(|v| (v.id, v)).collect(),
            organizations: organizations.into_iter().map(|o| (o.nz_id, o)).collect(),
        }
    }
}
