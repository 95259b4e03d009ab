//! Read-only master data: current product packing and warehouse billing
//! flags. Values read here are resolved once and pinned onto movements.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use stockledger_core::{ProductId, WarehouseId};

use crate::error::StoreError;
use crate::store::postgres::map_sqlx_error;

/// Current packing configuration of a product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductMasterData {
    pub units_per_carton: Option<u32>,
    pub storage_cartons_per_pallet: Option<u32>,
    pub shipping_cartons_per_pallet: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarehouseMasterData {
    /// Storage is billed by a third party (marketplace-managed warehouse).
    pub externally_billed: bool,
}

#[async_trait]
pub trait MasterDataSource: Send + Sync {
    async fn product(&self, product: ProductId) -> Result<Option<ProductMasterData>, StoreError>;

    async fn warehouse(&self, warehouse: WarehouseId) -> Result<Option<WarehouseMasterData>, StoreError>;
}

#[async_trait]
impl<M> MasterDataSource for Arc<M>
where
    M: MasterDataSource + ?Sized,
{
    async fn product(&self, product: ProductId) -> Result<Option<ProductMasterData>, StoreError> {
        (**self).product(product).await
    }

    async fn warehouse(&self, warehouse: WarehouseId) -> Result<Option<WarehouseMasterData>, StoreError> {
        (**self).warehouse(warehouse).await
    }
}

/// Mutable in-process master data.
#[derive(Debug, Default)]
pub struct InMemoryMasterData {
    products: RwLock<HashMap<ProductId, ProductMasterData>>,
    warehouses: RwLock<HashMap<WarehouseId, WarehouseMasterData>>,
}

impl InMemoryMasterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_product(&self, product: ProductId, data: ProductMasterData) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product, data);
        }
    }

    pub fn set_units_per_carton(&self, product: ProductId, units_per_carton: u32) {
        if let Ok(mut products) = self.products.write() {
            products.entry(product).or_default().units_per_carton = Some(units_per_carton);
        }
    }

    pub fn set_warehouse(&self, warehouse: WarehouseId, data: WarehouseMasterData) {
        if let Ok(mut warehouses) = self.warehouses.write() {
            warehouses.insert(warehouse, data);
        }
    }
}

#[async_trait]
impl MasterDataSource for InMemoryMasterData {
    async fn product(&self, product: ProductId) -> Result<Option<ProductMasterData>, StoreError> {
        let products = self
            .products
            .read()
            .map_err(|_| StoreError::Backend("master data poisoned".to_string()))?;
        Ok(products.get(&product).copied())
    }

    async fn warehouse(&self, warehouse: WarehouseId) -> Result<Option<WarehouseMasterData>, StoreError> {
        let warehouses = self
            .warehouses
            .read()
            .map_err(|_| StoreError::Backend("master data poisoned".to_string()))?;
        Ok(warehouses.get(&warehouse).copied())
    }
}

/// Master data read from `product_master` / `warehouse_master`.
#[derive(Debug, Clone)]
pub struct PgMasterData {
    pool: Arc<PgPool>,
}

impl PgMasterData {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn positive(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0)
}

#[async_trait]
impl MasterDataSource for PgMasterData {
    async fn product(&self, product: ProductId) -> Result<Option<ProductMasterData>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT units_per_carton, storage_cartons_per_pallet, shipping_cartons_per_pallet
            FROM product_master
            WHERE product_id = $1
            "#,
        )
        .bind(product.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_master", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let get = |column: &str| -> Result<Option<i32>, StoreError> {
            row.try_get(column)
                .map_err(|e| map_sqlx_error("product_master", e))
        };
        Ok(Some(ProductMasterData {
            units_per_carton: positive(get("units_per_carton")?),
            storage_cartons_per_pallet: positive(get("storage_cartons_per_pallet")?),
            shipping_cartons_per_pallet: positive(get("shipping_cartons_per_pallet")?),
        }))
    }

    async fn warehouse(&self, warehouse: WarehouseId) -> Result<Option<WarehouseMasterData>, StoreError> {
        let row = sqlx::query("SELECT externally_billed FROM warehouse_master WHERE warehouse_id = $1")
            .bind(warehouse.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("warehouse_master", e))?;

        row.map(|r| {
            r.try_get("externally_billed")
                .map(|externally_billed| WarehouseMasterData { externally_billed })
                .map_err(|e| map_sqlx_error("warehouse_master", e))
        })
        .transpose()
    }
}
