/// CSV input feed
/// Reads one problem instance from a directory of tables:
///
/// - `products.csv`: `product,lower_bound,upper_bound`; the `TOTAL_COST` row carries the budget
/// - `prices.csv`: `product,price,` then any number of historical sale columns (`-` or blank = 0)
/// - `costs.csv`: `product,producer,unit_cost`; a missing row means the pair cannot be produced
/// - `capacities.csv`: `producer,lower,upper`
/// - `demand.csv`: `product,mean,std`
/// - `demand_history.csv` (optional): `product,quantity`, one observation per row

use std::collections::HashMap;
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use crate::error::{AllocationError, Result};
use crate::models::{DemandParams, ProblemData, Producer, Product, ProductProducerCost};

/// Product id of the row that holds the total-cost budget
pub const BUDGET_SENTINEL: &str = "TOTAL_COST";

#[derive(Debug, Deserialize)]
struct ProductRow {
    product: String,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CostRow {
    product: String,
    producer: String,
    unit_cost: f64,
}

#[derive(Debug, Deserialize)]
struct CapacityRow {
    producer: String,
    lower: Option<f64>,
    upper: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DemandRow {
    product: String,
    mean: f64,
    std: f64,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    product: String,
    quantity: f64,
}

/// Price and sale history of one product
#[derive(Debug, Clone, PartialEq)]
struct PriceRow {
    price: f64,
    history: Vec<f64>,
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?)
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = reader(path)?;
    let rows = rdr.deserialize::<T>().collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(file = %path.display(), rows = rows.len(), "Read table");
    Ok(rows)
}

/// Historical cells: `-` and blank mean no sale
fn parse_history_cell(cell: &str) -> Option<f64> {
    match cell {
        "" | "-" => Some(0.0),
        other => other.parse().ok(),
    }
}

fn read_prices(path: &Path) -> Result<HashMap<String, PriceRow>> {
    let mut rdr = reader(path)?;
    let mut prices = HashMap::new();
    for record in rdr.records() {
        let record = record?;
        let Some(name) = record.get(0).filter(|n| !n.is_empty()) else {
            continue;
        };
        let price = record
            .get(1)
            .and_then(|p| p.parse::<f64>().ok())
            .ok_or_else(|| AllocationError::data(format!("product '{}' has no valid price", name)))?;
        let history = record
            .iter()
            .skip(2)
            .map(|cell| {
                parse_history_cell(cell)
                    .ok_or_else(|| AllocationError::data(format!("bad history value '{}' for product '{}'", cell, name)))
            })
            .collect::<Result<Vec<_>>>()?;
        prices.insert(name.to_string(), PriceRow { price, history });
    }
    Ok(prices)
}

/// Load and validate one problem instance from `dir`
pub fn load_problem(dir: &Path) -> Result<ProblemData> {
    let product_rows: Vec<ProductRow> = read_rows(&dir.join("products.csv"))?;
    let mut prices = read_prices(&dir.join("prices.csv"))?;
    let cost_rows: Vec<CostRow> = read_rows(&dir.join("costs.csv"))?;
    let capacity_rows: Vec<CapacityRow> = read_rows(&dir.join("capacities.csv"))?;
    let demand_rows: Vec<DemandRow> = read_rows(&dir.join("demand.csv"))?;

    let history_path = dir.join("demand_history.csv");
    let history_rows: Vec<HistoryRow> = if history_path.exists() {
        read_rows(&history_path)?
    } else {
        Vec::new()
    };

    let mut demand: HashMap<String, DemandParams> = demand_rows
        .into_iter()
        .map(|row| {
            (
                row.product,
                DemandParams {
                    mean: row.mean,
                    std_dev: row.std,
                    sample: Vec::new(),
                },
            )
        })
        .collect();
    for row in history_rows {
        match demand.get_mut(&row.product) {
            Some(params) => params.sample.push(row.quantity),
            None => {
                return Err(AllocationError::data(format!(
                    "demand history for unknown product '{}'",
                    row.product
                )))
            }
        }
    }

    let mut budget = None;
    let mut products = Vec::new();
    for row in product_rows {
        if row.product == BUDGET_SENTINEL {
            budget = row.upper_bound;
            continue;
        }
        let price = prices
            .remove(&row.product)
            .ok_or_else(|| AllocationError::data(format!("product '{}' has no price", row.product)))?;
        let params = demand
            .remove(&row.product)
            .ok_or_else(|| AllocationError::data(format!("product '{}' has no demand parameters", row.product)))?;
        products.push(Product {
            id: products.len(),
            name: row.product,
            selling_price: price.price,
            lower_bound: row.lower_bound.unwrap_or(0.0),
            upper_bound: row.upper_bound,
            demand: params,
            sales_history: price.history,
        });
    }

    let producers: Vec<Producer> = capacity_rows
        .into_iter()
        .enumerate()
        .map(|(id, row)| Producer {
            id,
            name: row.producer,
            lower_capacity: row.lower.unwrap_or(0.0),
            upper_capacity: row.upper,
        })
        .collect();

    let product_ids: HashMap<&str, usize> = products.iter().map(|p| (p.name.as_str(), p.id)).collect();
    let producer_ids: HashMap<&str, usize> = producers.iter().map(|p| (p.name.as_str(), p.id)).collect();
    let costs = cost_rows
        .iter()
        .map(|row| {
            let product_id = product_ids
                .get(row.product.as_str())
                .ok_or_else(|| AllocationError::data(format!("cost row for unknown product '{}'", row.product)))?;
            let producer_id = producer_ids
                .get(row.producer.as_str())
                .ok_or_else(|| AllocationError::data(format!("cost row for unknown producer '{}'", row.producer)))?;
            Ok(ProductProducerCost {
                product_id: *product_id,
                producer_id: *producer_id,
                unit_cost: row.unit_cost,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        products = products.len(),
        producers = producers.len(),
        pairs = costs.len(),
        budget = ?budget,
        "Loaded problem data"
    );
    ProblemData::new(products, producers, costs, budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn sample_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "products.csv",
            "product,lower_bound,upper_bound\nA,0,200\nB,10,\nTOTAL_COST,,1500\n",
        );
        write(dir.path(), "prices.csv", "product,price,h1,h2,h3\nA,10,1,-,0.5\nB,15,,1,1\n");
        write(
            dir.path(),
            "costs.csv",
            "product,producer,unit_cost\nA,P1,4\nA,P2,5\nB,P2,7\n",
        );
        write(dir.path(), "capacities.csv", "producer,lower,upper\nP1,0,120\nP2,5,\n");
        write(dir.path(), "demand.csv", "product,mean,std\nA,100,20\nB,50,10\n");
        dir
    }

    #[test]
    fn test_load_full_directory() {
        let dir = sample_dir();
        let data = load_problem(dir.path()).unwrap();

        assert_eq!(data.products.len(), 2);
        assert_eq!(data.producers.len(), 2);
        assert_eq!(data.budget, Some(1500.0));

        let b = &data.products[1];
        assert_eq!(b.name, "B");
        assert_eq!(b.lower_bound, 10.0);
        assert_eq!(b.upper_bound, None);
        assert_eq!(b.sales_history, vec![0.0, 1.0, 1.0]);
        assert_eq!(data.products[0].sales_history, vec![1.0, 0.0, 0.5]);
        assert_eq!(data.products[0].demand.mean, 100.0);

        assert_eq!(data.producers[1].lower_capacity, 5.0);
        assert_eq!(data.producers[1].upper_capacity, None);
        assert_eq!(data.unit_cost(0, 1), Some(5.0));
        assert_eq!(data.unit_cost(1, 0), None);
    }

    #[test]
    fn test_demand_history_is_optional_sample() {
        let dir = sample_dir();
        write(dir.path(), "demand_history.csv", "product,quantity\nA,90\nA,110\nB,40\n");
        let data = load_problem(dir.path()).unwrap();

        assert_eq!(data.products[0].demand.sample, vec![90.0, 110.0]);
        assert_eq!(data.products[1].demand.sample, vec![40.0]);
    }

    #[test]
    fn test_missing_price_is_a_data_error() {
        let dir = sample_dir();
        write(dir.path(), "prices.csv", "product,price\nA,10\n");
        let err = load_problem(dir.path()).unwrap_err();
        assert!(matches!(err, AllocationError::Data(ref msg) if msg.contains("'B'")));
    }

    #[test]
    fn test_unknown_producer_in_costs() {
        let dir = sample_dir();
        write(dir.path(), "costs.csv", "product,producer,unit_cost\nA,P9,4\n");
        assert!(matches!(load_problem(dir.path()), Err(AllocationError::Data(_))));
    }

    #[test]
    fn test_missing_table_is_reported() {
        let dir = sample_dir();
        fs::remove_file(dir.path().join("demand.csv")).unwrap();
        assert!(matches!(load_problem(dir.path()), Err(AllocationError::Csv(_))));
    }

    #[test]
    fn test_bundled_sample_loads() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/sample");
        let data = load_problem(&dir).unwrap();

        assert_eq!(data.products.len(), 3);
        assert_eq!(data.budget, Some(1600.0));
        assert_eq!(data.producers_for(2), vec![1]);
        assert_eq!(data.products[2].demand.sample.len(), 3);
    }

    #[test]
    fn test_history_cells() {
        assert_eq!(parse_history_cell("-"), Some(0.0));
        assert_eq!(parse_history_cell(""), Some(0.0));
        assert_eq!(parse_history_cell("0.25"), Some(0.25));
        assert_eq!(parse_history_cell("x"), None);
    }
}
