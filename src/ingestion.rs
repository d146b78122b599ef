use std::collections::HashMap;
use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::{Coordinates, Product, ProductStoreLink, Store, StoreAddress};

const PRODUCT_ID: &[&str] = &["id", "product_id", "id_produto", "cod_produto", "codigo", "código", "sku"];
const PRODUCT_NAME: &[&str] = &["name", "nome", "produto", "descricao", "descrição"];
const PRODUCT_SIZE: &[&str] = &["size", "tamanho", "volume", "embalagem"];
const PRODUCT_HIGHLIGHTED: &[&str] = &["highlighted", "destaque", "featured", "em_destaque"];
const PRODUCT_IMAGE: &[&str] = &["image", "imagem", "image_url", "url_imagem", "foto"];

const STORE_ID: &[&str] = &["id", "store_id", "pdv_id", "id_pdv", "cod_pdv", "codigo", "código", "pdv"];
const STORE_NAME: &[&str] = &["name", "nome", "nome_fantasia", "razao_social", "razão_social", "loja"];
const STORE_STREET: &[&str] = &["street", "address", "endereco", "endereço", "logradouro", "rua"];
const STORE_NEIGHBORHOOD: &[&str] = &["neighborhood", "bairro"];
const STORE_CITY: &[&str] = &["city", "cidade", "municipio", "município"];
const STORE_STATE: &[&str] = &["state", "uf", "estado"];
const STORE_POSTAL_CODE: &[&str] = &["postal_code", "postalcode", "cep", "zip"];
const STORE_LATITUDE: &[&str] = &["latitude", "lat"];
const STORE_LONGITUDE: &[&str] = &["longitude", "lon", "lng", "long"];

const LINK_PRODUCT: &[&str] = &["product_id", "id_produto", "cod_produto", "produto", "sku", "product"];
const LINK_STORE: &[&str] = &["store_id", "pdv_id", "id_pdv", "cod_pdv", "pdv", "store", "loja"];

/// Products, stores and their links as loaded from the tabular exports.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
    stores: Vec<Store>,
    store_index: HashMap<String, usize>,
    links: Vec<ProductStoreLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub products: usize,
    pub stores: usize,
    pub stores_with_coordinates: usize,
    pub links: usize,
}

impl Catalog {
    pub fn new(products: Vec<Product>, stores: Vec<Store>, links: Vec<ProductStoreLink>) -> Self {
        let mut store_index = HashMap::with_capacity(stores.len());
        let mut unique = Vec::with_capacity(stores.len());
        for store in stores {
            if store_index.contains_key(&store.id) {
                warn!(store_id = %store.id, "duplicate store id; keeping first row");
                continue;
            }
            store_index.insert(store.id.clone(), unique.len());
            unique.push(store);
        }
        Self {
            products,
            stores: unique,
            store_index,
            links,
        }
    }

    pub fn load(config: &AppConfig) -> AppResult<Self> {
        let products = parse_products(&read_table(&config.products_path())?)?;
        let stores = parse_stores(&read_table(&config.stores_path())?)?;
        let links = parse_links(&read_table(&config.links_path())?)?;
        let catalog = Self::new(products, stores, links);
        debug!(summary = ?catalog.summary(), "catalog loaded");
        Ok(catalog)
    }

    pub fn products(&self, highlighted_only: bool) -> Vec<Product> {
        self.products
            .iter()
            .filter(|product| !highlighted_only || product.highlighted)
            .cloned()
            .collect()
    }

    pub fn stores(&self) -> &[Store] {
        &self.stores
    }

    pub fn store(&self, id: &str) -> Option<&Store> {
        self.store_index.get(id).map(|&idx| &self.stores[idx])
    }

    pub fn links(&self) -> impl Iterator<Item = &ProductStoreLink> {
        self.links.iter()
    }

    /// Records coordinates resolved for a store so later queries skip the
    /// geocoder. Returns false for unknown ids.
    pub fn set_coordinates(&mut self, store_id: &str, coordinates: Coordinates) -> bool {
        match self.store_index.get(store_id) {
            Some(&idx) => {
                self.stores[idx].coordinates = Some(coordinates);
                true
            }
            None => false,
        }
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            products: self.products.len(),
            stores: self.stores.len(),
            stores_with_coordinates: self
                .stores
                .iter()
                .filter(|store| store.coordinates.is_some())
                .count(),
            links: self.links.len(),
        }
    }
}

fn read_table(path: &Path) -> AppResult<String> {
    let bytes = fs::read(path).map_err(|err| {
        AppError::Config(format!("failed to read {}: {err}", path.display()))
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn parse_products(text: &str) -> AppResult<Vec<Product>> {
    let table = Table::parse(text)?;
    let id = table.require("products", "id", PRODUCT_ID)?;
    let name = table.column(PRODUCT_NAME);
    let size = table.column(PRODUCT_SIZE);
    let highlighted = table.column(PRODUCT_HIGHLIGHTED);
    let image = table.column(PRODUCT_IMAGE);

    let mut products = Vec::new();
    for (line, record) in table.records() {
        let Some(product_id) = field(&record, Some(id)) else {
            warn!(line, "skipping product row without id");
            continue;
        };
        products.push(Product {
            name: field(&record, name).unwrap_or_else(|| product_id.clone()),
            id: product_id,
            size: field(&record, size),
            highlighted: field(&record, highlighted)
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
            image: field(&record, image),
        });
    }
    Ok(products)
}

pub fn parse_stores(text: &str) -> AppResult<Vec<Store>> {
    let table = Table::parse(text)?;
    let id = table.require("stores", "id", STORE_ID)?;
    let name = table.column(STORE_NAME);
    let street = table.column(STORE_STREET);
    let neighborhood = table.column(STORE_NEIGHBORHOOD);
    let city = table.column(STORE_CITY);
    let state = table.column(STORE_STATE);
    let postal_code = table.column(STORE_POSTAL_CODE);
    let latitude = table.column(STORE_LATITUDE);
    let longitude = table.column(STORE_LONGITUDE);

    let mut stores = Vec::new();
    for (line, record) in table.records() {
        let Some(store_id) = field(&record, Some(id)) else {
            warn!(line, "skipping store row without id");
            continue;
        };
        let coordinates = match (
            field(&record, latitude).and_then(|v| parse_decimal(&v)),
            field(&record, longitude).and_then(|v| parse_decimal(&v)),
        ) {
            (Some(lat), Some(lon)) => Coordinates::checked(lat, lon),
            _ => None,
        };
        stores.push(Store {
            name: field(&record, name).unwrap_or_else(|| store_id.clone()),
            id: store_id,
            address: StoreAddress {
                street: field(&record, street),
                neighborhood: field(&record, neighborhood),
                city: field(&record, city),
                state: field(&record, state),
                postal_code: field(&record, postal_code),
            },
            coordinates,
        });
    }
    Ok(stores)
}

pub fn parse_links(text: &str) -> AppResult<Vec<ProductStoreLink>> {
    let table = Table::parse(text)?;
    let product = table.require("links", "product id", LINK_PRODUCT)?;
    let store = table.require("links", "store id", LINK_STORE)?;

    let mut links = Vec::new();
    for (line, record) in table.records() {
        match (field(&record, Some(product)), field(&record, Some(store))) {
            (Some(product_id), Some(store_id)) => links.push(ProductStoreLink {
                product_id,
                store_id,
            }),
            _ => warn!(line, "skipping link row with missing ids"),
        }
    }
    Ok(links)
}

/// Accepts the truthy spellings seen across exports; everything else is false.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "sim" | "yes" | "s" | "y" | "x"
    )
}

/// Parses `-26.30` as well as the decimal-comma form `-26,30`.
pub fn parse_decimal(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if trimmed.contains('.') {
        trimmed.to_string()
    } else {
        trimmed.replace(',', ".")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

struct Table {
    headers: Vec<String>,
    rows: Vec<(u64, StringRecord)>,
}

impl Table {
    fn parse(text: &str) -> AppResult<Self> {
        let text = text.trim_start_matches('\u{feff}');
        let delimiter = sniff_delimiter(text);
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()?
            .iter()
            .map(normalize_header)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for result in reader.records() {
            match result {
                Ok(record) => {
                    let line = record.position().map(|p| p.line()).unwrap_or_default();
                    rows.push((line, record));
                }
                Err(err) => warn!(?err, "skipping unreadable row"),
            }
        }
        Ok(Self { headers, rows })
    }

    fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.headers.iter().position(|header| header == alias))
    }

    fn require(&self, table: &str, field: &str, aliases: &[&str]) -> AppResult<usize> {
        self.column(aliases).ok_or_else(|| {
            AppError::Parse(format!(
                "{table} table has no {field} column (looked for {})",
                aliases.join(", ")
            ))
        })
    }

    fn records(self) -> impl Iterator<Item = (u64, StringRecord)> {
        self.rows.into_iter()
    }
}

fn field(record: &StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|idx| record.get(idx))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|&candidate| header.bytes().filter(|&b| b == candidate).count())
        .filter(|&candidate| header.bytes().any(|b| b == candidate))
        .unwrap_or(b',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_products_with_aliases_and_flags() {
        let text = "\u{feff}Código;Nome;Tamanho;Destaque;Imagem\n\
                    12345;Cerveja Puro Malte;350ml;SIM;puro-malte.png\n\
                    09123;Refrigerante Cola;2L;0;\n\
                    ;Sem código;1L;true;\n\
                    55555;Água Mineral;500ml;yes;agua.png\n";
        let products = parse_products(text).unwrap();
        assert_eq!(products.len(), 3);
        assert_eq!(products[0].id, "12345");
        assert_eq!(products[0].size.as_deref(), Some("350ml"));
        assert!(products[0].highlighted);
        assert!(!products[1].highlighted);
        assert!(products[1].image.is_none());
        assert!(products[2].highlighted);
    }

    #[test]
    fn parses_stores_with_decimal_commas() {
        let text = "PDV_ID;Nome Fantasia;Endereço;Bairro;Cidade;UF;CEP;Latitude;Longitude\n\
                    A1;Mercado Central;Rua XV de Novembro, 100;Centro;Joinville;SC;89201-000;-26,3045;-48,8487\n\
                    B2;Empório;Rua Blumenau, 50;América;Joinville;SC;89204-250;;\n\
                    C3;Placeholder;Rua Sem Nome;;Joinville;SC;;0;0\n";
        let stores = parse_stores(text).unwrap();
        assert_eq!(stores.len(), 3);
        assert_eq!(stores[0].id, "A1");
        assert_eq!(stores[0].name, "Mercado Central");
        assert_eq!(
            stores[0].coordinates,
            Some(Coordinates::new(-26.3045, -48.8487))
        );
        assert_eq!(stores[0].address.street.as_deref(), Some("Rua XV de Novembro, 100"));
        assert!(stores[1].coordinates.is_none());
        assert_eq!(stores[1].address.postal_code.as_deref(), Some("89204-250"));
        assert!(stores[2].coordinates.is_none());
    }

    #[test]
    fn parses_comma_separated_stores_with_dot_decimals() {
        let text = "id,name,lat,lng\nS1,Loja Um,-26.30,-48.84\n";
        let stores = parse_stores(text).unwrap();
        assert_eq!(stores[0].coordinates, Some(Coordinates::new(-26.30, -48.84)));
    }

    #[test]
    fn parses_links_and_skips_incomplete_rows() {
        let text = "produto\tpdv\n12345\tA1\n12345\t\n09123\tB2\n12345\tA1\n";
        let links = parse_links(text).unwrap();
        assert_eq!(links.len(), 3);
        assert_eq!(links[1].product_id, "09123");
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let err = parse_links("foo,bar\n1,2\n").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn recognizes_boolean_spellings() {
        for truthy in ["true", "TRUE", "1", "sim", "Sim", "yes", " s "] {
            assert!(parse_flag(truthy), "{truthy}");
        }
        for falsy in ["false", "0", "não", "no", ""] {
            assert!(!parse_flag(falsy), "{falsy}");
        }
    }

    #[test]
    fn catalog_indexes_stores_and_updates_coordinates() {
        let stores = parse_stores("id;nome;cidade\nA;Loja A;Joinville\nA;Duplicada;Joinville\nB;Loja B;Joinville\n")
            .unwrap();
        let mut catalog = Catalog::new(Vec::new(), stores, Vec::new());
        assert_eq!(catalog.stores().len(), 2);
        assert_eq!(catalog.store("A").unwrap().name, "Loja A");

        assert!(catalog.set_coordinates("B", Coordinates::new(-26.3, -48.8)));
        assert!(!catalog.set_coordinates("Z", Coordinates::new(-26.3, -48.8)));
        assert_eq!(catalog.summary().stores_with_coordinates, 1);
    }

    #[test]
    fn loads_catalog_from_configured_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("produtos.csv"), "id,nome,destaque\n12345,Cerveja,1\n").unwrap();
        fs::write(dir.path().join("pdvs.csv"), "id;nome;lat;lon\nA;Loja A;-26.3;-48.8\n").unwrap();
        fs::write(dir.path().join("produtos_pdvs.csv"), "product_id,store_id\n12345,A\n").unwrap();
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };

        let catalog = Catalog::load(&config).unwrap();
        let summary = catalog.summary();
        assert_eq!(summary.products, 1);
        assert_eq!(summary.stores, 1);
        assert_eq!(summary.links, 1);
        assert_eq!(catalog.products(true).len(), 1);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        assert!(matches!(Catalog::load(&config), Err(AppError::Config(_))));
    }
}
