//! Schema metadata: the description of a served database.
//!
//! A schema file lists the tables of one SQLite database together with their
//! display and form specifications. Everything the service does per request is
//! derived from this metadata once at startup, so the loader is strict: any
//! inconsistency is a hard startup error, never a runtime surprise. Table and
//! column names end up spliced into SQL, which is why identifiers are
//! validated here.

pub mod expr;

pub use expr::Expr;

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

lazy_static! {
    static ref IDENT_REGEX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Declared storage type of a column. SQLite is dynamically typed; this drives
/// row decoding, write coercion, and generated DDL affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    #[default]
    Text,
    Boolean,
    Date,
    Datetime,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Real)
    }

    pub fn sql_affinity(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Date | ColumnType::Datetime => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Foreign key to another table's `id`; the grid shows `display` of the
/// referenced row instead of the raw id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub table: String,
    pub display: String,
}

/// Virtual column counting child rows (`table.foreign_key` points back here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasMany {
    pub table: String,
    pub foreign_key: String,
}

/// Client-side render hint passed through in the grid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderHint {
    Number {
        #[serde(default)]
        decimals: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    Ellipsis {
        length: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Textarea,
    Number,
    Email,
    Date,
    Datetime,
    Boolean,
    Select,
}

/// Presence of a form spec puts the column into create/update forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSpec {
    pub input: InputKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    /// Default value shown in the create form
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Grid column header; defaults to the capitalized column name
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub ty: ColumnType,
    #[serde(default)]
    pub references: Option<Reference>,
    #[serde(default)]
    pub has_many: Option<HasMany>,
    #[serde(default)]
    pub computed: Option<String>,
    /// Relationship columns render as navigable links unless set to false
    #[serde(default)]
    pub link: Option<bool>,
    /// Default sort column for the table; the last one declared wins
    #[serde(default)]
    pub order: Option<SortDir>,
    #[serde(default)]
    pub render: Option<RenderHint>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub form: Option<FormSpec>,
}

impl ColumnSpec {
    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| capitalize(&self.name))
    }

    /// `has_many` columns have no backing table column.
    pub fn is_virtual(&self) -> bool {
        self.has_many.is_some()
    }

    pub fn is_stored(&self) -> bool {
        !self.is_virtual()
    }

    /// Declared type, with the fixups the loader guarantees: `id` and foreign
    /// key columns are always integers.
    pub fn effective_type(&self) -> ColumnType {
        if self.name == "id" || self.references.is_some() {
            ColumnType::Integer
        } else {
            self.ty
        }
    }

    pub fn is_link(&self) -> bool {
        (self.references.is_some() || self.has_many.is_some()) && self.link.unwrap_or(true)
    }

    pub fn kind_name(&self) -> &'static str {
        if self.references.is_some() {
            "belongs_to"
        } else if self.has_many.is_some() {
            "has_many"
        } else if self.computed.is_some() {
            "computed"
        } else {
            "value"
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    pub name: String,
    /// Human-readable table title; defaults to the capitalized name
    #[serde(default)]
    pub title: Option<String>,
    /// Column representing a row wherever it is referenced (dropdowns, links);
    /// defaults to `id`
    #[serde(default)]
    pub display_column: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| capitalize(&self.name))
    }

    pub fn display_column(&self) -> &str {
        self.display_column.as_deref().unwrap_or("id")
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns backed by a table column, `id` excluded.
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| c.is_stored() && c.name != "id")
    }

    pub fn form_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.form.is_some())
    }

    pub fn computed_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.computed.is_some())
    }

    /// Default sort: the last column declaring `order`, falling back to
    /// newest-first by id.
    pub fn default_order(&self) -> (String, SortDir) {
        self.columns
            .iter()
            .rev()
            .find_map(|c| c.order.map(|dir| (c.name.clone(), dir)))
            .unwrap_or_else(|| ("id".to_string(), SortDir::Desc))
    }
}

/// All table specs of one served database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSchema {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

impl DatabaseSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid schema file: {}", path.display()))
    }

    pub fn from_toml(src: &str) -> Result<Self> {
        let schema: DatabaseSchema =
            toml::from_str(src).with_context(|| "Failed to parse schema metadata")?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            bail!("Schema must declare at least one [[tables]] entry");
        }

        let mut table_names = HashSet::new();
        for table in &self.tables {
            check_ident(&table.name, "table name")?;
            if !table_names.insert(table.name.as_str()) {
                bail!("Duplicate table name: {}", table.name);
            }
        }

        for table in &self.tables {
            self.validate_table(table)?;
        }
        Ok(())
    }

    fn validate_table(&self, table: &TableSpec) -> Result<()> {
        let mut column_names = HashSet::new();
        for col in &table.columns {
            check_ident(&col.name, "column name")?;
            // the __fk suffix labels foreign key companion columns in select
            // lists; a stored column with that name would collide
            if col.name.ends_with("__fk") {
                bail!(
                    "{}: column name '{}' uses the reserved __fk suffix",
                    table.name,
                    col.name
                );
            }
            if !column_names.insert(col.name.as_str()) {
                bail!("{}: duplicate column name: {}", table.name, col.name);
            }

            let relation_count = [
                col.references.is_some(),
                col.has_many.is_some(),
                col.computed.is_some(),
            ]
            .iter()
            .filter(|b| **b)
            .count();
            if relation_count > 1 {
                bail!(
                    "{}.{}: at most one of references, has_many, computed is allowed",
                    table.name,
                    col.name
                );
            }

            if col.name == "id" && (relation_count > 0 || col.form.is_some()) {
                bail!(
                    "{}: the implicit id column only accepts label/order/render customization",
                    table.name
                );
            }

            if let Some(ref reference) = col.references {
                self.validate_reference(table, col, reference)?;
            }
            if let Some(ref has_many) = col.has_many {
                self.validate_has_many(table, col, has_many)?;
            }
            if let Some(ref expr_src) = col.computed {
                self.validate_computed(table, col, expr_src)?;
            }

            if col.form.is_some() && (col.is_virtual() || col.computed.is_some()) {
                bail!(
                    "{}.{}: virtual and computed columns cannot appear in forms",
                    table.name,
                    col.name
                );
            }
            if col.required && (col.is_virtual() || col.computed.is_some()) {
                bail!(
                    "{}.{}: virtual and computed columns cannot be required",
                    table.name,
                    col.name
                );
            }
            if let Some(ref form) = col.form {
                if form.input == InputKind::Select && col.references.is_none() {
                    bail!(
                        "{}.{}: select inputs need a references target for their options",
                        table.name,
                        col.name
                    );
                }
                if col.references.is_some() && form.input != InputKind::Select {
                    bail!(
                        "{}.{}: foreign key form fields use the select input",
                        table.name,
                        col.name
                    );
                }
            }
        }

        // display_column must be a stored column of this table
        let display = table.display_column();
        if display != "id" {
            match table.column(display) {
                Some(c) if c.is_stored() && c.computed.is_none() => {}
                _ => bail!(
                    "{}: display_column '{}' is not a stored column",
                    table.name,
                    display
                ),
            }
        }

        Ok(())
    }

    fn validate_reference(
        &self,
        table: &TableSpec,
        col: &ColumnSpec,
        reference: &Reference,
    ) -> Result<()> {
        check_ident(&reference.table, "references.table")?;
        check_ident(&reference.display, "references.display")?;
        let target = self.table(&reference.table).with_context(|| {
            format!(
                "{}.{}: references unknown table '{}'",
                table.name, col.name, reference.table
            )
        })?;
        if reference.display != "id" {
            match target.column(&reference.display) {
                Some(c) if c.is_stored() => {}
                _ => bail!(
                    "{}.{}: display column '{}' does not exist on table '{}'",
                    table.name,
                    col.name,
                    reference.display,
                    reference.table
                ),
            }
        }
        // loader treats fk columns as integers; reject a contradictory decl
        if col.ty != ColumnType::Integer && col.ty != ColumnType::Text {
            bail!(
                "{}.{}: foreign key columns are integers",
                table.name,
                col.name
            );
        }
        Ok(())
    }

    fn validate_has_many(
        &self,
        table: &TableSpec,
        col: &ColumnSpec,
        has_many: &HasMany,
    ) -> Result<()> {
        check_ident(&has_many.table, "has_many.table")?;
        check_ident(&has_many.foreign_key, "has_many.foreign_key")?;
        let child = self.table(&has_many.table).with_context(|| {
            format!(
                "{}.{}: has_many targets unknown table '{}'",
                table.name, col.name, has_many.table
            )
        })?;
        match child.column(&has_many.foreign_key) {
            Some(fk_col) => {
                let points_back = fk_col
                    .references
                    .as_ref()
                    .map(|r| r.table == table.name)
                    .unwrap_or(false);
                if !points_back {
                    bail!(
                        "{}.{}: '{}.{}' is not a foreign key back to '{}'",
                        table.name,
                        col.name,
                        has_many.table,
                        has_many.foreign_key,
                        table.name
                    );
                }
            }
            None => bail!(
                "{}.{}: foreign key '{}' does not exist on table '{}'",
                table.name,
                col.name,
                has_many.foreign_key,
                has_many.table
            ),
        }
        Ok(())
    }

    fn validate_computed(&self, table: &TableSpec, col: &ColumnSpec, expr_src: &str) -> Result<()> {
        if !col.ty.is_numeric() {
            bail!(
                "{}.{}: computed columns must be integer or real",
                table.name,
                col.name
            );
        }
        let expr = Expr::parse(expr_src).with_context(|| {
            format!("{}.{}: invalid computed expression", table.name, col.name)
        })?;
        for referenced in expr.columns() {
            match table.column(referenced) {
                Some(c)
                    if c.is_stored()
                        && c.computed.is_none()
                        && c.effective_type().is_numeric()
                        && c.name != "id" =>
                {
                }
                _ => bail!(
                    "{}.{}: computed expression references '{}', which is not a stored numeric column",
                    table.name,
                    col.name,
                    referenced
                ),
            }
        }
        Ok(())
    }
}

fn check_ident(name: &str, what: &str) -> Result<()> {
    if !IDENT_REGEX.is_match(name) {
        bail!("Invalid {}: '{}'", what, name);
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETS: &str = r#"
        [[tables]]
        name = "user"
        display_column = "name"

        [[tables.columns]]
        name = "id"
        label = "pk_id"

        [[tables.columns]]
        name = "name"
        type = "text"
        required = true
        form = { input = "text", placeholder = "name" }

        [[tables.columns]]
        name = "email"
        type = "text"
        form = { input = "email", placeholder = "me@example.com" }

        [[tables.columns]]
        name = "pets"
        label = "Pets"
        has_many = { table = "pet", foreign_key = "owner_id" }

        [[tables]]
        name = "pet"
        display_column = "name"

        [[tables.columns]]
        name = "name"
        type = "text"
        required = true
        form = { input = "text" }

        [[tables.columns]]
        name = "owner_id"
        label = "Owner"
        references = { table = "user", display = "name" }
        form = { input = "select" }

        [[tables.columns]]
        name = "weight_lb"
        label = "Weight (lbs)"
        type = "real"
        order = "desc"
        form = { input = "number", placeholder = "35" }

        [[tables.columns]]
        name = "weight_kg"
        label = "Weight (kg)"
        type = "real"
        computed = "weight_lb / 2.205"
        render = { kind = "number", decimals = 1 }
    "#;

    #[test]
    fn parses_valid_schema() {
        let schema = DatabaseSchema::from_toml(PETS).unwrap();
        assert_eq!(schema.tables.len(), 2);

        let pet = schema.table("pet").unwrap();
        assert_eq!(pet.title(), "Pet");
        assert_eq!(pet.display_column(), "name");
        assert_eq!(pet.default_order(), ("weight_lb".to_string(), SortDir::Desc));

        let owner = pet.column("owner_id").unwrap();
        assert!(owner.is_link());
        assert_eq!(owner.effective_type(), ColumnType::Integer);
        assert_eq!(owner.kind_name(), "belongs_to");

        let user = schema.table("user").unwrap();
        assert_eq!(user.default_order(), ("id".to_string(), SortDir::Desc));
        let pets = user.column("pets").unwrap();
        assert!(pets.is_virtual());
        assert!(pets.is_link());
        let id = user.column("id").unwrap();
        assert_eq!(id.label(), "pk_id");
    }

    #[test]
    fn rejects_unknown_reference_target() {
        let src = r#"
            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "owner_id"
            references = { table = "nobody", display = "name" }
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_has_many_without_backreference() {
        let src = r#"
            [[tables]]
            name = "user"
            [[tables.columns]]
            name = "pets"
            has_many = { table = "pet", foreign_key = "name" }

            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "name"
            type = "text"
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_computed_referencing_computed() {
        let src = r#"
            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "weight_lb"
            type = "real"
            [[tables.columns]]
            name = "weight_kg"
            type = "real"
            computed = "weight_lb / 2.205"
            [[tables.columns]]
            name = "weight_st"
            type = "real"
            computed = "weight_kg * 0.157"
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_form_on_virtual_column() {
        let src = r#"
            [[tables]]
            name = "user"
            [[tables.columns]]
            name = "pets"
            has_many = { table = "pet", foreign_key = "owner_id" }
            form = { input = "text" }

            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "owner_id"
            references = { table = "user", display = "id" }
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_bad_identifiers() {
        let src = r#"
            [[tables]]
            name = "bad table"
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());

        let src = r#"
            [[tables]]
            name = "t"
            [[tables.columns]]
            name = "a; drop table users"
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_select_without_reference() {
        let src = r#"
            [[tables]]
            name = "t"
            [[tables.columns]]
            name = "a"
            form = { input = "select" }
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_fk_companion_suffix() {
        let src = r#"
            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "owner__fk"
            type = "integer"
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }

    #[test]
    fn rejects_non_select_input_on_foreign_key() {
        let src = r#"
            [[tables]]
            name = "user"
            [[tables.columns]]
            name = "name"
            type = "text"

            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "owner_id"
            references = { table = "user", display = "name" }
            form = { input = "number" }
        "#;
        assert!(DatabaseSchema::from_toml(src).is_err());
    }
}
