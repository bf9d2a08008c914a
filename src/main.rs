use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::signal;
use tracing::info;

use bookstore_backoffice::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{FeedbackType, ProductModel, StockAdjustmentModel},
    events::{self, outbox},
    services::{
        factory::{ServiceContainer, ServiceFactory},
        feedback::SubmitFeedbackRequest,
        inventory_ledger::AdjustStockRequest,
        orders::{CreateOrderRequest, ImportRow, OrderDetail, OrderItemRequest, UpdateOrderRequest},
        products::{CreateProductRequest, UpdateProductRequest},
        students::CreateStudentRequest,
        Page, PageLimits,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Worker => run_worker(&context).await?,
        Commands::Products(command) => handle_products_command(&context, command, cli.json).await?,
        Commands::Stock(command) => handle_stock_command(&context, command, cli.json).await?,
        Commands::Orders(command) => handle_orders_command(&context, command, cli.json).await?,
        Commands::Subscriptions(command) => {
            handle_subscriptions_command(&context, command, cli.json).await?
        }
        Commands::Notifications(command) => {
            handle_notifications_command(&context, command, cli.json).await?
        }
        Commands::Students(command) => handle_students_command(&context, command, cli.json).await?,
        Commands::Feedback(command) => handle_feedback_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "bookstore", about = "Campus bookstore back-office", version)]
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
    /// Dispatch outbox events to subscribers until interrupted
    Worker,
    #[command(subcommand)]
    Products(ProductsCommands),
    #[command(subcommand)]
    Stock(StockCommands),
    #[command(subcommand)]
    Orders(OrdersCommands),
    #[command(subcommand)]
    Subscriptions(SubscriptionsCommands),
    #[command(subcommand)]
    Notifications(NotificationsCommands),
    #[command(subcommand)]
    Students(StudentsCommands),
    #[command(subcommand)]
    Feedback(FeedbackCommands),
}

#[derive(Subcommand)]
enum ProductsCommands {
    Create(ProductCreateArgs),
    List(ProductListArgs),
    Show(IdArgs),
    Update(ProductUpdateArgs),
    Delete(IdArgs),
}

#[derive(Args)]
struct IdArgs {
    #[arg(long)]
    id: i32,
}

#[derive(Args)]
struct PageArgs {
    #[arg(long, default_value_t = 0)]
    skip: u64,
    #[arg(long)]
    limit: Option<u64>,
}

impl From<PageArgs> for Page {
    fn from(args: PageArgs) -> Self {
        Page {
            skip: args.skip,
            limit: args.limit,
        }
    }
}

#[derive(Args)]
struct ProductCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    price: Decimal,
    #[arg(long, default_value = "0")]
    cost_price: Decimal,
    #[arg(long, default_value_t = 0)]
    stock: i32,
    #[arg(long)]
    min_stock: Option<i32>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    image_url: Option<String>,
}

#[derive(Args)]
struct ProductListArgs {
    #[arg(long, help = "Category filter; 'all' lists every category")]
    category: Option<String>,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args)]
struct ProductUpdateArgs {
    #[arg(long)]
    id: i32,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    price: Option<Decimal>,
    #[arg(long)]
    cost_price: Option<Decimal>,
    #[arg(long)]
    min_stock: Option<i32>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    image_url: Option<String>,
}

#[derive(Subcommand)]
enum StockCommands {
    Adjust(StockAdjustArgs),
    History(StockHistoryArgs),
}

#[derive(Args)]
struct StockAdjustArgs {
    #[arg(long)]
    product_id: i32,
    #[arg(long, help = "add, remove or set")]
    kind: String,
    #[arg(long)]
    quantity: i32,
    #[arg(long, help = "purchase, return, damage, inventory, sale or other")]
    reason: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct StockHistoryArgs {
    #[arg(long)]
    product_id: i32,
}

#[derive(Subcommand)]
enum OrdersCommands {
    Create(OrderCreateArgs),
    List(OrderListArgs),
    Show(IdArgs),
    Update(OrderUpdateArgs),
    Delete(IdArgs),
    Import(OrderImportArgs),
}

#[derive(Args)]
struct OrderCreateArgs {
    #[arg(long)]
    customer: String,
    #[arg(long)]
    status: Option<String>,
    #[arg(
        long = "item",
        required = true,
        value_parser = parse_item,
        help = "Line item as PRODUCT_ID:QUANTITY:UNIT_PRICE (repeatable)"
    )]
    items: Vec<OrderItemRequest>,
}

#[derive(Args)]
struct OrderListArgs {
    #[arg(long, help = "Status filter; 'all' lists every order")]
    status: Option<String>,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args)]
struct OrderUpdateArgs {
    #[arg(long)]
    id: i32,
    #[arg(long)]
    customer: Option<String>,
    #[arg(long)]
    status: Option<String>,
}

#[derive(Args)]
struct OrderImportArgs {
    #[arg(long, help = "JSON file with an array of {customer_name, product_id, quantity}")]
    file: PathBuf,
}

#[derive(Subcommand)]
enum SubscriptionsCommands {
    Add(SubscriptionArgs),
    Remove(SubscriptionArgs),
    List(StudentArgs),
}

#[derive(Args)]
struct SubscriptionArgs {
    #[arg(long)]
    student_id: i32,
    #[arg(long)]
    product_id: i32,
}

#[derive(Args)]
struct StudentArgs {
    #[arg(long)]
    student_id: i32,
}

#[derive(Subcommand)]
enum NotificationsCommands {
    List(NotificationListArgs),
    Read(NotificationReadArgs),
    ReadAll(StudentArgs),
}

#[derive(Args)]
struct NotificationListArgs {
    #[arg(long)]
    student_id: i32,
    #[arg(long, action = ArgAction::SetTrue)]
    unread_only: bool,
}

#[derive(Args)]
struct NotificationReadArgs {
    #[arg(long)]
    student_id: i32,
    #[arg(long)]
    id: i32,
}

#[derive(Subcommand)]
enum StudentsCommands {
    Create(StudentCreateArgs),
    Show(IdArgs),
}

#[derive(Args)]
struct StudentCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    student_number: String,
}

#[derive(Subcommand)]
enum FeedbackCommands {
    Submit(FeedbackSubmitArgs),
    List,
    Status(FeedbackStatusArgs),
    Notes(FeedbackNotesArgs),
}

#[derive(Args)]
struct FeedbackSubmitArgs {
    #[arg(long)]
    student_id: i32,
    #[arg(long = "type", help = "suggestion, bug, complaint, feature or other")]
    feedback_type: FeedbackType,
    #[arg(long)]
    message: String,
    #[arg(long, action = ArgAction::SetTrue)]
    can_contact: bool,
}

#[derive(Args)]
struct FeedbackStatusArgs {
    #[arg(long)]
    id: i32,
    #[arg(long, help = "new, in_progress, resolved or closed")]
    status: String,
}

#[derive(Args)]
struct FeedbackNotesArgs {
    #[arg(long)]
    id: i32,
    #[arg(long, help = "Omit to clear the notes")]
    notes: Option<String>,
}

fn parse_item(raw: &str) -> Result<OrderItemRequest, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 {
        return Err(format!(
            "expected PRODUCT_ID:QUANTITY:UNIT_PRICE, got '{}'",
            raw
        ));
    }
    Ok(OrderItemRequest {
        product_id: parts[0]
            .trim()
            .parse()
            .map_err(|e| format!("invalid product id '{}': {}", parts[0], e))?,
        quantity: parts[1]
            .trim()
            .parse()
            .map_err(|e| format!("invalid quantity '{}': {}", parts[1], e))?,
        price: parts[2]
            .trim()
            .parse()
            .map_err(|e| format!("invalid price '{}': {}", parts[2], e))?,
    })
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    factory: ServiceFactory,
    services: ServiceContainer,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let factory = ServiceFactory::new(db.clone(), PageLimits::from(&config));
        let services = ServiceContainer::new(&factory);

        Ok(Self {
            config,
            db,
            factory,
            services,
        })
    }

    /// Delivers every due outbox event to the notification fan-out and waits
    /// for the handlers to finish.
    async fn flush_events(&self) -> Result<()> {
        let (sender, rx) = events::channel(self.config.event_channel_capacity);
        let dispatcher = tokio::spawn(events::process_events(rx, self.factory.event_handlers()));

        let mut delivered = 0;
        loop {
            let batch = outbox::drain_once(&self.db, &sender, self.config.outbox_batch_size)
                .await
                .context("failed to dispatch outbox events")?;
            if batch == 0 {
                break;
            }
            delivered += batch;
        }

        drop(sender);
        dispatcher.await.context("event dispatcher panicked")?;
        if delivered > 0 {
            info!(delivered, "Outbox events dispatched");
        }
        Ok(())
    }
}

async fn run_worker(context: &CliContext) -> Result<()> {
    let (sender, rx) = events::channel(context.config.event_channel_capacity);
    let dispatcher = tokio::spawn(events::process_events(rx, context.factory.event_handlers()));
    let worker = outbox::start_worker(
        context.db.clone(),
        sender,
        context.config.outbox_batch_size,
        Duration::from_millis(context.config.outbox_poll_interval_ms),
    );

    println!("Outbox worker running; press Ctrl-C to stop");
    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    worker.abort();
    let _ = worker.await;
    dispatcher.await.context("event dispatcher panicked")?;
    Ok(())
}

async fn handle_products_command(
    context: &CliContext,
    command: ProductsCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.products;
    match command {
        ProductsCommands::Create(args) => {
            let product = service
                .create_product(CreateProductRequest {
                    name: args.name,
                    category: args.category,
                    price: args.price,
                    cost_price: args.cost_price,
                    stock: args.stock,
                    min_stock: args.min_stock,
                    description: args.description,
                    size: args.size,
                    image_url: args.image_url,
                })
                .await
                .context("failed to create product")?;
            emit(json, &product, render_product)?;
        }
        ProductsCommands::List(args) => {
            let list = service
                .list_products(args.category.as_deref(), args.page.into())
                .await
                .context("failed to list products")?;
            if json {
                print_json(&list)?;
            } else {
                println!("{} product(s)", list.total);
                list.products.iter().for_each(render_product);
            }
        }
        ProductsCommands::Show(args) => {
            let product = service
                .get_product(args.id)
                .await
                .with_context(|| format!("failed to fetch product {}", args.id))?;
            emit(json, &product, render_product)?;
        }
        ProductsCommands::Update(args) => {
            let product = service
                .update_product(
                    args.id,
                    UpdateProductRequest {
                        name: args.name,
                        category: args.category,
                        price: args.price,
                        cost_price: args.cost_price,
                        min_stock: args.min_stock,
                        description: args.description,
                        size: args.size,
                        image_url: args.image_url,
                    },
                )
                .await
                .with_context(|| format!("failed to update product {}", args.id))?;
            context.flush_events().await?;
            emit(json, &product, render_product)?;
        }
        ProductsCommands::Delete(args) => {
            service
                .delete_product(args.id)
                .await
                .with_context(|| format!("failed to delete product {}", args.id))?;
            println!("Product {} deleted", args.id);
        }
    }
    Ok(())
}

async fn handle_stock_command(context: &CliContext, command: StockCommands, json: bool) -> Result<()> {
    let ledger = &context.services.ledger;
    match command {
        StockCommands::Adjust(args) => {
            let adjustment = ledger
                .adjust_stock(AdjustStockRequest {
                    product_id: args.product_id,
                    kind: args.kind,
                    quantity: args.quantity,
                    reason: args.reason,
                    notes: args.notes,
                })
                .await
                .context("stock adjustment failed")?;
            context.flush_events().await?;
            emit(json, &adjustment, render_adjustment)?;
        }
        StockCommands::History(args) => {
            let history = ledger
                .get_history(args.product_id)
                .await
                .with_context(|| format!("failed to load history for product {}", args.product_id))?;
            if json {
                print_json(&history)?;
            } else {
                history.iter().for_each(render_adjustment);
            }
        }
    }
    Ok(())
}

async fn handle_orders_command(context: &CliContext, command: OrdersCommands, json: bool) -> Result<()> {
    let service = &context.services.orders;
    match command {
        OrdersCommands::Create(args) => {
            let order = service
                .create_order(CreateOrderRequest {
                    customer_name: args.customer,
                    status: args.status,
                    items: args.items,
                })
                .await
                .context("failed to create order")?;
            context.flush_events().await?;
            emit(json, &order, render_order)?;
        }
        OrdersCommands::List(args) => {
            let list = service
                .list_orders(args.status.as_deref(), args.page.into())
                .await
                .context("failed to list orders")?;
            if json {
                print_json(&list)?;
            } else {
                println!("{} order(s)", list.total);
                for order in &list.orders {
                    println!(
                        "- Order #{} • {} • {} • total {:.2} • {}",
                        order.id, order.customer_name, order.status, order.total, order.created_at
                    );
                }
            }
        }
        OrdersCommands::Show(args) => {
            let order = service
                .get_order(args.id)
                .await
                .with_context(|| format!("failed to fetch order {}", args.id))?;
            emit(json, &order, render_order)?;
        }
        OrdersCommands::Update(args) => {
            let order = service
                .update_order(
                    args.id,
                    UpdateOrderRequest {
                        customer_name: args.customer,
                        status: args.status,
                    },
                )
                .await
                .with_context(|| format!("failed to update order {}", args.id))?;
            context.flush_events().await?;
            emit(json, &order, render_order)?;
        }
        OrdersCommands::Delete(args) => {
            service
                .delete_order(args.id)
                .await
                .with_context(|| format!("failed to delete order {}", args.id))?;
            context.flush_events().await?;
            println!("Order {} deleted and stock restored", args.id);
        }
        OrdersCommands::Import(args) => {
            let raw = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let rows: Vec<ImportRow> =
                serde_json::from_str(&raw).context("import file must be a JSON array of rows")?;
            let summary = service
                .import_orders(rows)
                .await
                .context("order import failed")?;
            context.flush_events().await?;
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "Imported {} order(s): {:?}",
                    summary.created_count, summary.order_ids
                );
            }
        }
    }
    Ok(())
}

async fn handle_subscriptions_command(
    context: &CliContext,
    command: SubscriptionsCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.subscriptions;
    match command {
        SubscriptionsCommands::Add(args) => {
            let subscription = service
                .subscribe(args.student_id, args.product_id)
                .await
                .context("failed to subscribe")?;
            if json {
                print_json(&subscription)?;
            } else {
                println!(
                    "Student {} subscribed to product {}",
                    subscription.student_id, subscription.product_id
                );
            }
        }
        SubscriptionsCommands::Remove(args) => {
            service
                .unsubscribe(args.student_id, args.product_id)
                .await
                .context("failed to unsubscribe")?;
            println!(
                "Student {} unsubscribed from product {}",
                args.student_id, args.product_id
            );
        }
        SubscriptionsCommands::List(args) => {
            let product_ids = service
                .subscriptions_of(args.student_id)
                .await
                .context("failed to list subscriptions")?;
            if json {
                print_json(&product_ids)?;
            } else {
                println!("Student {} follows products {:?}", args.student_id, product_ids);
            }
        }
    }
    Ok(())
}

async fn handle_notifications_command(
    context: &CliContext,
    command: NotificationsCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.notifications;
    match command {
        NotificationsCommands::List(args) => {
            let notifications = service
                .list_for_student(args.student_id, args.unread_only)
                .await
                .context("failed to list notifications")?;
            if json {
                print_json(&notifications)?;
            } else {
                for n in &notifications {
                    let marker = if n.is_read { " " } else { "*" };
                    println!("{} #{} [{}] {}", marker, n.id, n.notification_type, n.message);
                }
            }
        }
        NotificationsCommands::Read(args) => {
            let notification = service
                .mark_read(args.student_id, args.id)
                .await
                .with_context(|| format!("failed to mark notification {} read", args.id))?;
            if json {
                print_json(&notification)?;
            } else {
                println!("Notification {} marked read", notification.id);
            }
        }
        NotificationsCommands::ReadAll(args) => {
            let updated = service
                .mark_all_read(args.student_id)
                .await
                .context("failed to mark notifications read")?;
            println!("{} notification(s) marked read", updated);
        }
    }
    Ok(())
}

async fn handle_students_command(
    context: &CliContext,
    command: StudentsCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.students;
    let student = match command {
        StudentsCommands::Create(args) => service
            .create_student(CreateStudentRequest {
                name: args.name,
                email: args.email,
                student_number: args.student_number,
            })
            .await
            .context("failed to register student")?,
        StudentsCommands::Show(args) => service
            .get_student(args.id)
            .await
            .with_context(|| format!("failed to fetch student {}", args.id))?,
    };
    if json {
        print_json(&student)?;
    } else {
        println!(
            "- Student #{} • {} • {} • {}",
            student.id, student.student_number, student.name, student.email
        );
    }
    Ok(())
}

async fn handle_feedback_command(
    context: &CliContext,
    command: FeedbackCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.feedback;
    let updated = match command {
        FeedbackCommands::Submit(args) => service
            .submit_feedback(SubmitFeedbackRequest {
                student_id: args.student_id,
                feedback_type: args.feedback_type,
                message: args.message,
                can_contact: args.can_contact,
            })
            .await
            .context("failed to submit feedback")?,
        FeedbackCommands::List => {
            let entries = service.list_feedback().await.context("failed to list feedback")?;
            if json {
                print_json(&entries)?;
            } else {
                for entry in &entries {
                    println!(
                        "- #{} [{}] {} • {} • {}",
                        entry.id, entry.status, entry.feedback_type, entry.student_name, entry.message
                    );
                }
            }
            return Ok(());
        }
        FeedbackCommands::Status(args) => service
            .update_status(args.id, &args.status)
            .await
            .with_context(|| format!("failed to update feedback {}", args.id))?,
        FeedbackCommands::Notes(args) => service
            .update_notes(args.id, args.notes)
            .await
            .with_context(|| format!("failed to update feedback {}", args.id))?,
    };
    if json {
        print_json(&updated)?;
    } else {
        println!("Feedback #{} is {}", updated.id, updated.status);
    }
    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, render: fn(&T)) -> Result<()> {
    if json {
        print_json(value)
    } else {
        render(value);
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).map_err(|e| anyhow!("failed to render JSON: {}", e))?
    );
    Ok(())
}

fn render_product(product: &ProductModel) {
    println!(
        "- Product #{} • {} • {} • ₱{:.2} • stock {}",
        product.id, product.name, product.category, product.price, product.stock
    );
}

fn render_adjustment(adjustment: &StockAdjustmentModel) {
    println!(
        "- #{} {} {} ({}) {} -> {}{}",
        adjustment.id,
        adjustment.kind,
        adjustment.quantity,
        adjustment.reason,
        adjustment.previous_stock,
        adjustment.new_stock,
        adjustment
            .notes
            .as_deref()
            .map(|n| format!(" • {}", n))
            .unwrap_or_default()
    );
}

fn render_order(order: &OrderDetail) {
    println!(
        "Order #{} • {} • {} • total ₱{:.2}",
        order.id, order.customer_name, order.status, order.total
    );
    for item in &order.items {
        println!(
            "  - {} (product {}) x{} @ ₱{:.2} = ₱{:.2}",
            item.product_name, item.product_id, item.quantity, item.price, item.line_total
        );
    }
}
