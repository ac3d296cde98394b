use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use orderly_api::{
    config::{self, AppConfig},
    db,
    entities::Unit,
    services::{
        aggregator::AddToOrderRequest,
        catalog::{CreateProductRequest, CreateSupplierRequest},
        lifecycle::SendOrderRequest,
    },
    store::OrderWithDetails,
    AppState,
};

#[derive(Parser)]
#[command(name = "orderly", about = "Orderly CLI for catalog and purchase-order maintenance", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Suppliers(SupplierCommands),
    #[command(subcommand)]
    Products(ProductCommands),
    #[command(subcommand)]
    Orders(OrderCommands),
    /// Delete every supplier, product, order and the settings
    Reset(ResetArgs),
}

#[derive(Subcommand)]
enum SupplierCommands {
    List,
    Add(AddSupplierArgs),
    /// Set the display order to the given ids
    Reorder(ReorderArgs),
}

#[derive(Subcommand)]
enum ProductCommands {
    List(ListProductsArgs),
    Add(AddProductArgs),
    Search(SearchArgs),
    Reorder(ReorderArgs),
}

#[derive(Subcommand)]
enum OrderCommands {
    /// List draft orders
    Drafts,
    /// Add a product to its supplier's draft order
    Add(AddToOrderArgs),
    Send(SendArgs),
    /// Set the display order of an order's items
    ReorderItems(ReorderArgs),
}

#[derive(Args)]
struct AddSupplierArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
}

#[derive(Args)]
struct ListProductsArgs {
    #[arg(long, help = "Only products of this supplier")]
    supplier: Option<Uuid>,
}

#[derive(Args)]
struct AddProductArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    supplier: Uuid,
    #[arg(long, value_parser = parse_unit, default_value = "τεμ")]
    unit: Unit,
}

#[derive(Args)]
struct SearchArgs {
    term: String,
    #[arg(long)]
    limit: Option<u64>,
}

#[derive(Args)]
struct ReorderArgs {
    #[arg(required = true, num_args = 1.., help = "Ids in the desired display order")]
    ids: Vec<Uuid>,
}

#[derive(Args)]
struct AddToOrderArgs {
    #[arg(long)]
    supplier: Uuid,
    #[arg(long)]
    product: Uuid,
    #[arg(long)]
    quantity: Decimal,
    #[arg(long, value_parser = parse_unit, default_value = "τεμ")]
    unit: Unit,
}

#[derive(Args)]
struct SendArgs {
    order: Uuid,
    #[arg(long, help = "Also send a copy to this address")]
    copy_to: Option<String>,
}

#[derive(Args)]
struct ResetArgs {
    #[arg(long, action = ArgAction::SetTrue, help = "Confirm the deletion")]
    yes: bool,
}

fn parse_unit(raw: &str) -> Result<Unit, String> {
    Unit::from_str(raw.trim()).map_err(|_| format!("unknown unit '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing("warn", false);

    match cli.command {
        Commands::Migrate => migrate(&cfg).await,
        Commands::Reset(args) => reset(cfg, args).await,
        command => {
            let state = AppState::from_config(cfg)
                .await
                .context("failed to open the store")?;
            run(&state, command, cli.json).await
        }
    }
}

async fn migrate(cfg: &AppConfig) -> Result<()> {
    if cfg.uses_embedded_store() {
        println!("Embedded store has no migrations");
        return Ok(());
    }
    let pool = db::establish_connection_from_app_config(cfg).await?;
    db::run_migrations(&pool).await?;
    println!("Migrations applied");
    Ok(())
}

async fn reset(cfg: AppConfig, args: ResetArgs) -> Result<()> {
    if !args.yes {
        bail!("refusing to delete all data without --yes");
    }
    let state = AppState::from_config(cfg).await?;
    state.store.clear_all().await?;
    println!("All data deleted");
    Ok(())
}

async fn run(state: &AppState, command: Commands, json: bool) -> Result<()> {
    let services = &state.services;
    match command {
        Commands::Suppliers(SupplierCommands::List) => {
            let suppliers = services.catalog.list_suppliers().await?;
            if json {
                return print_json(&suppliers);
            }
            for s in suppliers {
                println!(
                    "{}  {:<30} {}",
                    s.id,
                    s.name,
                    s.email.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Suppliers(SupplierCommands::Add(args)) => {
            let supplier = services
                .catalog
                .create_supplier(CreateSupplierRequest {
                    name: args.name,
                    email: args.email,
                    phone: args.phone,
                    sort_order: None,
                })
                .await?;
            if json {
                return print_json(&supplier);
            }
            println!("Created supplier {} ({})", supplier.name, supplier.id);
        }
        Commands::Suppliers(SupplierCommands::Reorder(args)) => {
            services.ordering.reorder_suppliers(&args.ids).await?;
            println!("Reordered {} suppliers", args.ids.len());
        }
        Commands::Products(ProductCommands::List(args)) => {
            let products = services.catalog.list_products(args.supplier).await?;
            if json {
                return print_json(&products);
            }
            for p in products {
                println!("{}  {:<30} {}", p.id, p.name, p.unit);
            }
        }
        Commands::Products(ProductCommands::Add(args)) => {
            let product = services
                .catalog
                .create_product(CreateProductRequest {
                    name: args.name,
                    supplier_id: args.supplier,
                    unit: args.unit,
                    sort_order: None,
                })
                .await?;
            if json {
                return print_json(&product);
            }
            println!("Created product {} ({})", product.name, product.id);
        }
        Commands::Products(ProductCommands::Search(args)) => {
            let hits = services
                .catalog
                .search_products(&args.term, args.limit)
                .await?;
            if json {
                return print_json(&hits);
            }
            for hit in hits {
                println!(
                    "{}  {:<30} {}",
                    hit.product.id, hit.product.name, hit.supplier.name
                );
            }
        }
        Commands::Products(ProductCommands::Reorder(args)) => {
            services.ordering.reorder_products(&args.ids).await?;
            println!("Reordered {} products", args.ids.len());
        }
        Commands::Orders(OrderCommands::Drafts) => {
            let drafts = services.lifecycle.list_draft_orders().await?;
            if json {
                return print_json(&drafts);
            }
            for order in &drafts {
                print_order(order);
            }
        }
        Commands::Orders(OrderCommands::Add(args)) => {
            let result = services
                .aggregator
                .add_to_order(AddToOrderRequest {
                    supplier_id: args.supplier,
                    product_id: args.product,
                    quantity: args.quantity,
                    unit: args.unit,
                })
                .await?;
            if json {
                return print_json(&result);
            }
            let verb = if result.created { "Added" } else { "Merged" };
            println!(
                "{} line {}: quantity now {} {}",
                verb,
                result.item.id,
                result.item.quantity.normalize(),
                result.item.unit
            );
        }
        Commands::Orders(OrderCommands::Send(args)) => {
            let request = SendOrderRequest {
                send_copy_to_user: args.copy_to.is_some(),
                user_email: args.copy_to,
            };
            let result = services.lifecycle.send(args.order, request).await?;
            if json {
                return print_json(&result);
            }
            println!("{}", result.message);
        }
        Commands::Orders(OrderCommands::ReorderItems(args)) => {
            services.ordering.reorder_order_items(&args.ids).await?;
            println!("Reordered {} items", args.ids.len());
        }
        Commands::Migrate | Commands::Reset(_) => bail!("command runs without an open store"),
    }
    Ok(())
}

fn print_order(order: &OrderWithDetails) {
    println!(
        "{}  {} [{}] {} item(s)",
        order.order.id,
        order.supplier.name,
        order.order.status,
        order.items.len()
    );
    for line in &order.items {
        println!(
            "    {:<30} {} {}",
            line.product.name,
            line.item.quantity.normalize(),
            line.item.unit
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
