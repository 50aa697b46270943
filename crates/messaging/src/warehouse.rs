//! Warehouse selection for order lines.

use domain::{Sku, WarehouseId};

/// Picks the warehouse that should serve a SKU.
pub trait WarehouseSelector: Send + Sync {
    fn select(&self, sku: &Sku) -> WarehouseId;
}

/// Serves every SKU from one configured warehouse.
#[derive(Debug, Clone)]
pub struct SingleWarehouseSelector {
    warehouse: WarehouseId,
}

impl SingleWarehouseSelector {
    pub fn new(warehouse: impl Into<WarehouseId>) -> Self {
        Self {
            warehouse: warehouse.into(),
        }
    }
}

impl WarehouseSelector for SingleWarehouseSelector {
    fn select(&self, _sku: &Sku) -> WarehouseId {
        self.warehouse.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_selects_the_configured_warehouse() {
        let selector = SingleWarehouseSelector::new("WH-01");
        assert_eq!(selector.select(&Sku::new("SKU-001")), WarehouseId::new("WH-01"));
        assert_eq!(selector.select(&Sku::new("SKU-999")), WarehouseId::new("WH-01"));
    }
}
