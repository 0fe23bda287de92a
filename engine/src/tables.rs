//! The table registry of the field-data application.
//!
//! Order matters: each entry may only reference entries above it. Ranks are
//! assigned from the position in [`FIELD_TABLES`], ten apart so a table can
//! be slotted in between without renumbering its neighbours.

use crate::{
    registry::{FieldDef, FieldType, TableDescriptor, TableRegistry, TableScope},
    Rank,
};

/// `(name, scope, referenced tables)` in dependency order.
pub const FIELD_TABLES: &[(&str, TableScope, &[&str])] = &[
    // Reference data shared by every tenant
    ("countries", TableScope::Global, &[]),
    ("currencies", TableScope::Global, &[]),
    ("units_of_measure", TableScope::Global, &[]),
    ("crop_categories", TableScope::Global, &[]),
    ("crops", TableScope::Global, &["crop_categories"]),
    ("crop_varieties", TableScope::Global, &["crops"]),
    ("livestock_types", TableScope::Global, &[]),
    ("input_categories", TableScope::Global, &[]),
    ("pest_catalog", TableScope::Global, &["crops"]),
    ("disease_catalog", TableScope::Global, &["crops"]),
    // Tenancy and access
    ("tenants", TableScope::Tenant, &["countries", "currencies"]),
    ("tenant_settings", TableScope::Tenant, &["tenants"]),
    ("roles", TableScope::Tenant, &["tenants"]),
    ("permissions", TableScope::Tenant, &["roles"]),
    ("users", TableScope::Tenant, &["tenants"]),
    ("user_roles", TableScope::Tenant, &["users", "roles"]),
    ("groups", TableScope::Tenant, &["tenants"]),
    ("group_members", TableScope::Tenant, &["groups", "users"]),
    ("devices", TableScope::Tenant, &["users"]),
    // Geography
    ("regions", TableScope::Tenant, &["tenants", "countries"]),
    ("districts", TableScope::Tenant, &["regions"]),
    ("wards", TableScope::Tenant, &["districts"]),
    ("villages", TableScope::Tenant, &["wards"]),
    ("collection_centers", TableScope::Tenant, &["villages"]),
    // Programs
    ("programs", TableScope::Tenant, &["tenants", "currencies"]),
    ("program_phases", TableScope::Tenant, &["programs"]),
    ("program_targets", TableScope::Tenant, &["programs", "regions"]),
    ("seasons", TableScope::Tenant, &["tenants"]),
    ("field_agents", TableScope::Tenant, &["users", "groups", "regions"]),
    ("agent_assignments", TableScope::Tenant, &["field_agents", "villages"]),
    ("cooperatives", TableScope::Tenant, &["tenants", "villages"]),
    ("cooperative_officers", TableScope::Tenant, &["cooperatives", "users"]),
    // Farmers
    ("farmers", TableScope::Tenant, &["tenants", "villages", "groups", "cooperatives"]),
    ("farmer_contacts", TableScope::Tenant, &["farmers"]),
    ("farmer_documents", TableScope::Tenant, &["farmers"]),
    ("farmer_bank_accounts", TableScope::Tenant, &["farmers"]),
    ("farmer_households", TableScope::Tenant, &["farmers"]),
    ("household_members", TableScope::Tenant, &["farmer_households"]),
    ("farmer_programs", TableScope::Tenant, &["farmers", "programs"]),
    ("farmer_surveys", TableScope::Tenant, &["farmers", "field_agents"]),
    ("survey_answers", TableScope::Tenant, &["farmer_surveys"]),
    ("farmer_visits", TableScope::Tenant, &["farmers", "field_agents"]),
    ("visit_photos", TableScope::Tenant, &["farmer_visits"]),
    // Land
    ("farm_plots", TableScope::Tenant, &["farmers", "villages"]),
    ("plot_boundaries", TableScope::Tenant, &["farm_plots"]),
    ("soil_tests", TableScope::Tenant, &["farm_plots"]),
    ("water_sources", TableScope::Tenant, &["farm_plots"]),
    ("irrigation_systems", TableScope::Tenant, &["farm_plots", "water_sources"]),
    ("land_certificates", TableScope::Tenant, &["farm_plots", "farmers"]),
    // Production
    ("plantings", TableScope::Tenant, &["farm_plots", "crop_varieties", "seasons"]),
    ("crop_calendars", TableScope::Tenant, &["plantings"]),
    ("field_activities", TableScope::Tenant, &["plantings", "field_agents"]),
    ("pest_observations", TableScope::Tenant, &["plantings", "pest_catalog"]),
    ("disease_observations", TableScope::Tenant, &["plantings", "disease_catalog"]),
    ("yield_estimates", TableScope::Tenant, &["plantings"]),
    ("harvests", TableScope::Tenant, &["plantings", "units_of_measure"]),
    ("harvest_quality_checks", TableScope::Tenant, &["harvests"]),
    ("livestock", TableScope::Tenant, &["farmers", "livestock_types"]),
    ("livestock_health_records", TableScope::Tenant, &["livestock"]),
    // Inputs
    ("input_suppliers", TableScope::Tenant, &["tenants"]),
    ("inputs", TableScope::Tenant, &["input_categories", "input_suppliers", "units_of_measure"]),
    ("input_stock", TableScope::Tenant, &["inputs", "collection_centers"]),
    ("input_distributions", TableScope::Tenant, &["inputs", "farmers", "programs"]),
    ("input_usage", TableScope::Tenant, &["input_distributions", "plantings"]),
    // Subsidies and payments
    ("subsidy_schemes", TableScope::Tenant, &["programs"]),
    ("subsidy_applications", TableScope::Tenant, &["subsidy_schemes", "farmers"]),
    ("subsidy_approvals", TableScope::Tenant, &["subsidy_applications", "users"]),
    ("subsidy_payments", TableScope::Tenant, &["subsidy_approvals", "farmers", "farmer_bank_accounts"]),
    ("loans", TableScope::Tenant, &["farmers", "programs"]),
    ("loan_repayments", TableScope::Tenant, &["loans"]),
    ("payment_batches", TableScope::Tenant, &["programs", "users"]),
    ("payment_items", TableScope::Tenant, &["payment_batches", "farmers"]),
    // Training and advisory
    ("trainings", TableScope::Tenant, &["programs", "field_agents"]),
    ("training_sessions", TableScope::Tenant, &["trainings", "villages"]),
    ("training_attendance", TableScope::Tenant, &["training_sessions", "farmers"]),
    ("advisories", TableScope::Tenant, &["crops", "regions"]),
    ("advisory_deliveries", TableScope::Tenant, &["advisories", "farmers"]),
    // Aggregation and marketplace
    ("produce_collections", TableScope::Tenant, &["harvests", "collection_centers"]),
    ("warehouse_receipts", TableScope::Tenant, &["produce_collections"]),
    ("buyers", TableScope::Tenant, &["tenants"]),
    ("market_prices", TableScope::Tenant, &["crops", "regions", "currencies"]),
    ("marketplace_listings", TableScope::Tenant, &["farmers", "crops"]),
    ("marketplace_offers", TableScope::Tenant, &["marketplace_listings", "buyers"]),
    ("sales_orders", TableScope::Tenant, &["marketplace_offers"]),
    ("sales_order_items", TableScope::Tenant, &["sales_orders", "produce_collections"]),
    ("deliveries", TableScope::Tenant, &["sales_orders"]),
    ("buyer_payments", TableScope::Tenant, &["sales_orders"]),
    // Follow-up
    ("grievances", TableScope::Tenant, &["farmers", "users"]),
    ("grievance_responses", TableScope::Tenant, &["grievances"]),
    ("tasks", TableScope::Tenant, &["users", "farmers"]),
    ("notes", TableScope::Tenant, &["users"]),
];

/// Rank of the entry at `position` in [`FIELD_TABLES`].
pub fn rank_at(position: usize) -> Rank {
    (position as Rank + 1) * 10
}

/// Payload schemas for the tables whose shape the engine checks locally.
/// Tables not listed accept any JSON object.
fn field_schema(table: &str) -> Vec<FieldDef> {
    match table {
        "tenants" => vec![FieldDef::required("name", FieldType::String)],
        "users" => vec![
            FieldDef::required("email", FieldType::String),
            FieldDef::optional("display_name", FieldType::String),
        ],
        "farmers" => vec![
            FieldDef::required("first_name", FieldType::String),
            FieldDef::required("last_name", FieldType::String),
            FieldDef::optional("village_id", FieldType::String),
            FieldDef::optional("group_id", FieldType::String),
            FieldDef::optional("phone", FieldType::String),
            FieldDef::optional("birth_year", FieldType::Int),
            FieldDef::optional("registered_at", FieldType::Timestamp),
        ],
        "farm_plots" => vec![
            FieldDef::required("farmer_id", FieldType::String),
            FieldDef::optional("area_hectares", FieldType::Float),
            FieldDef::optional("boundary", FieldType::Json),
        ],
        "subsidy_payments" => vec![
            FieldDef::required("farmer_id", FieldType::String),
            FieldDef::required("amount", FieldType::Float),
            FieldDef::optional("paid_at", FieldType::Timestamp),
        ],
        "harvests" => vec![
            FieldDef::required("planting_id", FieldType::String),
            FieldDef::optional("quantity", FieldType::Float),
        ],
        _ => Vec::new(),
    }
}

/// Descriptors for every table of the application.
pub fn field_tables() -> Vec<TableDescriptor> {
    FIELD_TABLES
        .iter()
        .enumerate()
        .map(|(position, (name, scope, references))| TableDescriptor {
            name: (*name).to_string(),
            rank: rank_at(position),
            references: references.iter().map(|r| (*r).to_string()).collect(),
            scope: *scope,
            fields: field_schema(name),
        })
        .collect()
}

/// The validated registry of the field-data application.
pub fn field_registry() -> crate::error::Result<TableRegistry> {
    TableRegistry::new(field_tables())
}
