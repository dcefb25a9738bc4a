use std::collections::HashMap;

use thiserror::Error;

use super::schema::SchemaError;
use super::table_config::{DividaAtivaTable, TableConfig};

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Table {0:?} is already registered")]
pub struct DuplicateNameError(pub String);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    DuplicateName(#[from] DuplicateNameError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The known table configurations, in registration order.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Vec<TableConfig>,
    index: HashMap<String, usize>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three PGFN tables.
    pub fn divida_ativa() -> Result<TableRegistry, RegistryError> {
        let mut registry = TableRegistry::new();
        for table in DividaAtivaTable::ALL {
            registry.register(table.config()?)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, config: TableConfig) -> Result<(), DuplicateNameError> {
        if self.index.contains_key(&config.name) {
            return Err(DuplicateNameError(config.name));
        }
        self.index.insert(config.name.clone(), self.tables.len());
        self.tables.push(config);
        Ok(())
    }

    pub fn all(&self) -> &[TableConfig] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&TableConfig> {
        self.index.get(name).map(|&i| &self.tables[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::db::schema::Schema;

    fn config(name: &str) -> Result<TableConfig, Box<dyn Error>> {
        let schema = Schema::from_reader("t", "field_name,field_type\na,text\n".as_bytes())?;
        Ok(TableConfig::with_schema(name, &["*.zip"], true, schema))
    }

    #[test]
    fn register_keeps_insertion_order() -> Result<(), Box<dyn Error>> {
        let mut registry = TableRegistry::new();
        registry.register(config("b")?)?;
        registry.register(config("a")?)?;
        registry.register(config("c")?)?;
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(registry.get("a").map(|t| t.name.as_str()), Some("a"));
        assert!(registry.get("z").is_none());
        Ok(())
    }

    #[test]
    fn duplicate_name() -> Result<(), Box<dyn Error>> {
        let mut registry = TableRegistry::new();
        registry.register(config("a")?)?;
        let err = registry.register(config("a")?).unwrap_err();
        assert_eq!(err, DuplicateNameError("a".to_string()));
        assert_eq!(registry.all().len(), 1);
        Ok(())
    }

    #[test]
    fn divida_ativa_registry() -> Result<(), Box<dyn Error>> {
        let registry = TableRegistry::divida_ativa()?;
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![
                "divida_ativa_fgts_orig",
                "divida_ativa_previdenciario_orig",
                "divida_ativa_nao_previdenciario_orig"
            ]
        );
        assert!(registry.all().iter().all(|t| !t.schema.is_empty()));
        Ok(())
    }
}
