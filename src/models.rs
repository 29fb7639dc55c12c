/// Data model for the production-allocation problem
/// Products, producers, sparse cost table, and the plans a solve produces

use std::collections::{BTreeMap, BTreeSet};
use crate::error::{AllocationError, Result};

/// Product with its price, production bounds and demand description
#[derive(Clone, Debug)]
pub struct Product {
    pub id: usize,
    pub name: String,
    pub selling_price: f64,
    /// Minimum aggregate production (when produced at all, under activation flags)
    pub lower_bound: f64,
    /// Maximum aggregate production; `None` means uncapped
    pub upper_bound: Option<f64>,
    pub demand: DemandParams,
    /// Historical per-period sale likelihoods, used by the point-estimate variant
    pub sales_history: Vec<f64>,
}

impl Product {
    /// Empirical average sale likelihood, `None` without history
    pub fn sale_probability(&self) -> Option<f64> {
        if self.sales_history.is_empty() {
            return None;
        }
        Some(self.sales_history.iter().sum::<f64>() / self.sales_history.len() as f64)
    }
}

/// Demand distribution parameters per product
#[derive(Clone, Debug, Default)]
pub struct DemandParams {
    pub mean: f64,
    pub std_dev: f64,
    /// Observed demand values for empirical resampling
    pub sample: Vec<f64>,
}

/// Producer with aggregate capacity bounds
#[derive(Clone, Debug)]
pub struct Producer {
    pub id: usize,
    pub name: String,
    /// Minimum utilization (when used at all, under activation flags)
    pub lower_capacity: f64,
    /// `None` means uncapped
    pub upper_capacity: Option<f64>,
}

/// Unit production cost of one (product, producer) pair
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProductProducerCost {
    pub product_id: usize,
    pub producer_id: usize,
    pub unit_cost: f64,
}

/// Complete, immutable input of one run
#[derive(Clone, Debug)]
pub struct ProblemData {
    pub products: Vec<Product>,
    pub producers: Vec<Producer>,
    /// Only feasible pairs are present
    costs: BTreeMap<(usize, usize), f64>,
    /// Upper bound on total production cost
    pub budget: Option<f64>,
}

impl ProblemData {
    /// Assemble and validate the input tables
    pub fn new(
        products: Vec<Product>,
        producers: Vec<Producer>,
        costs: Vec<ProductProducerCost>,
        budget: Option<f64>,
    ) -> Result<Self> {
        let data = ProblemData {
            products,
            producers,
            costs: costs
                .into_iter()
                .map(|c| ((c.product_id, c.producer_id), c.unit_cost))
                .collect(),
            budget,
        };
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<()> {
        let mut product_ids = BTreeSet::new();
        for product in &self.products {
            if !product_ids.insert(product.id) {
                return Err(AllocationError::data(format!("duplicate product id {}", product.id)));
            }
            if !product.selling_price.is_finite() {
                return Err(AllocationError::data(format!("product '{}' has no valid price", product.name)));
            }
            if product.lower_bound < 0.0 {
                return Err(AllocationError::data(format!(
                    "product '{}' has negative lower bound {}",
                    product.name, product.lower_bound
                )));
            }
            if let Some(upper) = product.upper_bound {
                if upper < product.lower_bound {
                    return Err(AllocationError::data(format!(
                        "product '{}' has upper bound {} below lower bound {}",
                        product.name, upper, product.lower_bound
                    )));
                }
            }
        }

        let mut producer_ids = BTreeSet::new();
        for producer in &self.producers {
            if !producer_ids.insert(producer.id) {
                return Err(AllocationError::data(format!("duplicate producer id {}", producer.id)));
            }
            if producer.lower_capacity < 0.0 {
                return Err(AllocationError::data(format!(
                    "producer '{}' has negative lower capacity",
                    producer.name
                )));
            }
            if let Some(upper) = producer.upper_capacity {
                if upper < producer.lower_capacity {
                    return Err(AllocationError::data(format!(
                        "producer '{}' has upper capacity {} below lower capacity {}",
                        producer.name, upper, producer.lower_capacity
                    )));
                }
            }
        }

        for (&(product_id, producer_id), &unit_cost) in &self.costs {
            if !product_ids.contains(&product_id) {
                return Err(AllocationError::data(format!("cost entry references unknown product {}", product_id)));
            }
            if !producer_ids.contains(&producer_id) {
                return Err(AllocationError::data(format!("cost entry references unknown producer {}", producer_id)));
            }
            if !unit_cost.is_finite() {
                return Err(AllocationError::data(format!(
                    "cost for product {} at producer {} is not finite",
                    product_id, producer_id
                )));
            }
        }

        if let Some(budget) = self.budget {
            if budget < 0.0 {
                return Err(AllocationError::data("budget is negative"));
            }
        }
        Ok(())
    }

    pub fn get_product(&self, product_id: usize) -> Option<&Product> {
        self.products.iter().find(|p| p.id == product_id)
    }

    pub fn get_producer(&self, producer_id: usize) -> Option<&Producer> {
        self.producers.iter().find(|p| p.id == producer_id)
    }

    /// Unit cost of a pair, `None` when the pair is infeasible
    pub fn unit_cost(&self, product_id: usize, producer_id: usize) -> Option<f64> {
        self.costs.get(&(product_id, producer_id)).copied()
    }

    /// All feasible pairs in (product, producer) order
    pub fn cost_entries(&self) -> impl Iterator<Item = ProductProducerCost> + '_ {
        self.costs.iter().map(|(&(product_id, producer_id), &unit_cost)| ProductProducerCost {
            product_id,
            producer_id,
            unit_cost,
        })
    }

    /// Producers that can make the given product
    pub fn producers_for(&self, product_id: usize) -> Vec<usize> {
        self.costs
            .range((product_id, usize::MIN)..=(product_id, usize::MAX))
            .map(|(&(_, producer_id), _)| producer_id)
            .collect()
    }

    /// Position of a product in `products`, which is also its row in a scenario set
    pub fn product_index(&self, product_id: usize) -> Option<usize> {
        self.products.iter().position(|p| p.id == product_id)
    }
}

/// First-stage decision: integer quantity per feasible (product, producer) pair
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationPlan {
    pub quantities: BTreeMap<(usize, usize), u64>,
}

impl AllocationPlan {
    pub fn quantity(&self, product_id: usize, producer_id: usize) -> u64 {
        self.quantities.get(&(product_id, producer_id)).copied().unwrap_or(0)
    }

    /// Aggregate production of one product across producers
    pub fn total_for_product(&self, product_id: usize) -> u64 {
        self.quantities
            .iter()
            .filter(|((p, _), _)| *p == product_id)
            .map(|(_, q)| *q)
            .sum()
    }

    /// Aggregate utilization of one producer across products
    pub fn total_for_producer(&self, producer_id: usize) -> u64 {
        self.quantities
            .iter()
            .filter(|((_, j), _)| *j == producer_id)
            .map(|(_, q)| *q)
            .sum()
    }

    /// Total production cost; pairs absent from the cost table contribute nothing
    pub fn total_cost(&self, data: &ProblemData) -> f64 {
        self.quantities
            .iter()
            .map(|(&(p, j), &q)| data.unit_cost(p, j).unwrap_or(0.0) * q as f64)
            .sum()
    }

    pub fn total_units(&self) -> u64 {
        self.quantities.values().sum()
    }
}

/// Second-stage decision: units sold per product (row) and scenario (column)
#[derive(Clone, Debug, Default)]
pub struct SalesRealization {
    pub product_ids: Vec<usize>,
    pub sold: Vec<Vec<f64>>,
}

impl SalesRealization {
    pub fn scenario_count(&self) -> usize {
        self.sold.first().map(|row| row.len()).unwrap_or(0)
    }

    /// Average units sold of the product at row `index`
    pub fn mean_sold(&self, index: usize) -> f64 {
        match self.sold.get(index) {
            Some(row) if !row.is_empty() => row.iter().sum::<f64>() / row.len() as f64,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn product(id: usize, name: &str, price: f64, mean: f64, std_dev: f64, bounds: (f64, Option<f64>)) -> Product {
        Product {
            id,
            name: name.to_string(),
            selling_price: price,
            lower_bound: bounds.0,
            upper_bound: bounds.1,
            demand: DemandParams { mean, std_dev, sample: Vec::new() },
            sales_history: Vec::new(),
        }
    }

    pub fn producer(id: usize, name: &str, lower: f64, upper: Option<f64>) -> Producer {
        Producer {
            id,
            name: name.to_string(),
            lower_capacity: lower,
            upper_capacity: upper,
        }
    }

    pub fn cost(product_id: usize, producer_id: usize, unit_cost: f64) -> ProductProducerCost {
        ProductProducerCost { product_id, producer_id, unit_cost }
    }

    /// Two products, two producers, every pair feasible
    pub fn two_by_two() -> ProblemData {
        ProblemData::new(
            vec![
                product(0, "A", 10.0, 100.0, 20.0, (0.0, Some(200.0))),
                product(1, "B", 15.0, 50.0, 10.0, (0.0, Some(100.0))),
            ],
            vec![
                producer(0, "P1", 0.0, Some(120.0)),
                producer(1, "P2", 0.0, Some(150.0)),
            ],
            vec![cost(0, 0, 4.0), cost(1, 0, 6.0), cost(0, 1, 5.0), cost(1, 1, 7.0)],
            None,
        )
        .unwrap()
    }
}
