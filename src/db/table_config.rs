use std::borrow::Cow;
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

use super::schema::{Schema, SchemaError};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown encoding {0:?}")]
    UnknownEncoding(String),
    #[error("Unknown dialect {0:?}")]
    UnknownDialect(String),
}

#[derive(Error, Debug)]
#[error("Invalid UTF-8 at byte {0}")]
pub struct DecodeError(pub usize);

/// Text encoding of the source files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    Utf8,
    Latin1,
    #[default]
    Iso8859_15,
}

impl Encoding {
    /// Name understood by PostgreSQL's `COPY ... ENCODING` option.
    pub fn postgres_name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF8",
            Encoding::Latin1 => "LATIN1",
            Encoding::Iso8859_15 => "LATIN9",
        }
    }

    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, DecodeError> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| DecodeError(e.valid_up_to())),
            Encoding::Latin1 => Ok(decode_single_byte(bytes, |b| b as char)),
            Encoding::Iso8859_15 => Ok(decode_single_byte(bytes, latin9_char)),
        }
    }
}

fn decode_single_byte(bytes: &[u8], f: impl Fn(u8) -> char) -> Cow<'_, str> {
    if bytes.is_ascii() {
        // ascii is valid utf-8
        return Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default());
    }
    Cow::Owned(bytes.iter().map(|&b| f(b)).collect())
}

/// ISO-8859-15 differs from Latin-1 in eight code points.
fn latin9_char(b: u8) -> char {
    match b {
        0xA4 => '\u{20AC}',
        0xA6 => '\u{0160}',
        0xA8 => '\u{0161}',
        0xB4 => '\u{017D}',
        0xB8 => '\u{017E}',
        0xBC => '\u{0152}',
        0xBD => '\u{0153}',
        0xBE => '\u{0178}',
        _ => b as char,
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Encoding::Latin1),
            "iso-8859-15" | "latin9" | "latin-9" => Ok(Encoding::Iso8859_15),
            _ => Err(ConfigError::UnknownEncoding(s.to_string())),
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "iso-8859-1",
            Encoding::Iso8859_15 => "iso-8859-15",
        };
        write!(f, "{}", s)
    }
}

/// Delimiter and quoting rules, named after the python csv dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
}

impl Dialect {
    pub const EXCEL: Dialect = Dialect {
        delimiter: b',',
        quote: b'"',
    };
    pub const EXCEL_SEMICOLON: Dialect = Dialect {
        delimiter: b';',
        quote: b'"',
    };
    pub const EXCEL_TAB: Dialect = Dialect {
        delimiter: b'\t',
        quote: b'"',
    };
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::EXCEL_SEMICOLON
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "excel" => Ok(Dialect::EXCEL),
            "excel-semicolon" => Ok(Dialect::EXCEL_SEMICOLON),
            "excel-tab" => Ok(Dialect::EXCEL_TAB),
            _ => Err(ConfigError::UnknownDialect(s.to_string())),
        }
    }
}

/// Describes one destination table: where its archives are, how to read
/// them and which columns it has.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub name: String,
    pub archive_name_patterns: Vec<String>,
    pub inner_file_pattern: Option<String>,
    pub has_header: bool,
    pub schema: Schema,
    pub encoding: Encoding,
    pub dialect: Dialect,
}

impl TableConfig {
    /// The schema is resolved here, once, from the embedded schema files.
    pub fn new(
        name: &str,
        archive_name_patterns: &[&str],
        has_header: bool,
        schema_reference: &str,
    ) -> Result<TableConfig, SchemaError> {
        Ok(TableConfig {
            name: name.to_string(),
            archive_name_patterns: archive_name_patterns
                .iter()
                .map(|s| s.to_string())
                .collect(),
            inner_file_pattern: None,
            has_header,
            schema: Schema::load(schema_reference)?,
            encoding: Encoding::default(),
            dialect: Dialect::default(),
        })
    }

    /// Build a configuration around an already loaded schema.
    pub fn with_schema(
        name: &str,
        archive_name_patterns: &[&str],
        has_header: bool,
        schema: Schema,
    ) -> TableConfig {
        TableConfig {
            name: name.to_string(),
            archive_name_patterns: archive_name_patterns
                .iter()
                .map(|s| s.to_string())
                .collect(),
            inner_file_pattern: None,
            has_header,
            schema,
            encoding: Encoding::default(),
            dialect: Dialect::default(),
        }
    }

    pub fn inner_file_pattern(mut self, pattern: &str) -> Self {
        self.inner_file_pattern = Some(pattern.to_string());
        self
    }
}

/// The tables published by PGFN in each quarterly release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividaAtivaTable {
    Fgts,
    Previdenciario,
    NaoPrevidenciario,
}

impl DividaAtivaTable {
    pub const ALL: [DividaAtivaTable; 3] = [
        DividaAtivaTable::Fgts,
        DividaAtivaTable::Previdenciario,
        DividaAtivaTable::NaoPrevidenciario,
    ];

    pub fn config(&self) -> Result<TableConfig, SchemaError> {
        let (name, archive, schema) = match self {
            DividaAtivaTable::Fgts => (
                "divida_ativa_fgts_orig",
                "Dados_abertos_FGTS.zip",
                "divida_ativa_fgts.csv",
            ),
            DividaAtivaTable::Previdenciario => (
                "divida_ativa_previdenciario_orig",
                "Dados_abertos_Previdenciario.zip",
                "divida_ativa_previdenciario.csv",
            ),
            DividaAtivaTable::NaoPrevidenciario => (
                "divida_ativa_nao_previdenciario_orig",
                "Dados_abertos_Nao_Previdenciario.zip",
                "divida_ativa_nao_previdenciario.csv",
            ),
        };
        Ok(TableConfig::new(name, &[archive], true, schema)?.inner_file_pattern("*.csv"))
    }
}
