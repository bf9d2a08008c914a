mod common;

use assert_matches::assert_matches;
use bookstore_backoffice::{
    errors::ServiceError,
    services::{
        orders::{CreateOrderRequest, OrderItemRequest},
        products::{CreateProductRequest, UpdateProductRequest},
        Page,
    },
};
use common::TestApp;
use rust_decimal_macros::dec;

#[tokio::test]
async fn products_are_created_trimmed_and_fetched() {
    let app = TestApp::new().await;

    let created = app
        .services
        .products
        .create_product(CreateProductRequest {
            name: "  Nursing Uniform ".to_string(),
            category: " Uniforms ".to_string(),
            price: dec!(850.50),
            cost_price: dec!(600),
            stock: 12,
            min_stock: Some(3),
            description: Some("White, with school patch".to_string()),
            size: Some("M".to_string()),
            image_url: None,
        })
        .await
        .expect("create");

    assert_eq!(created.name, "Nursing Uniform");
    assert_eq!(created.category, "Uniforms");

    let fetched = app
        .services
        .products
        .get_product(created.id)
        .await
        .expect("get");
    assert_eq!(fetched.stock, 12);
    assert_eq!(fetched.min_stock, Some(3));
    assert_eq!(fetched.price, dec!(850.50));
    // Initial stock is not a ledger entry.
    assert_eq!(app.adjustment_count().await, 0);

    let err = app.services.products.get_product(404).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(ref msg) if msg == "Product with ID 404 not found");
}

#[tokio::test]
async fn invalid_products_are_rejected() {
    let app = TestApp::new().await;

    let base = CreateProductRequest {
        name: "Ruler".to_string(),
        category: "Supplies".to_string(),
        price: dec!(25),
        cost_price: dec!(10),
        stock: 5,
        min_stock: None,
        description: None,
        size: None,
        image_url: None,
    };

    let blank_name = CreateProductRequest {
        name: "   ".to_string(),
        ..base.clone()
    };
    let negative_stock = CreateProductRequest {
        stock: -1,
        ..base.clone()
    };
    let negative_cost = CreateProductRequest {
        cost_price: dec!(-0.01),
        ..base
    };

    for request in [blank_name, negative_stock, negative_cost] {
        let err = app
            .services
            .products
            .create_product(request)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidArgument(_));
    }

    let listed = app
        .services
        .products
        .list_products(None, Page::default())
        .await
        .expect("list");
    assert_eq!(listed.total, 0);
}

#[tokio::test]
async fn listing_filters_by_category_and_pages() {
    let app = TestApp::new().await;
    app.create_product_in("Algebra", "Books", 5, dec!(300)).await;
    app.create_product_in("PE Pants", "Uniforms", 5, dec!(400)).await;
    app.create_product_in("Geometry", "Books", 5, dec!(320)).await;

    let all = app
        .services
        .products
        .list_products(Some("all"), Page::default())
        .await
        .expect("all");
    assert_eq!(all.total, 3);
    assert_eq!(
        all.products.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["Algebra", "PE Pants", "Geometry"]
    );

    let books = app
        .services
        .products
        .list_products(Some("Books"), Page::default())
        .await
        .expect("books");
    assert_eq!(books.total, 2);
    assert!(books.products.iter().all(|p| p.category == "Books"));

    let second_page = app
        .services
        .products
        .list_products(
            None,
            Page {
                skip: 1,
                limit: Some(1),
            },
        )
        .await
        .expect("page");
    assert_eq!(second_page.total, 3);
    assert_eq!(second_page.products.len(), 1);
    assert_eq!(second_page.products[0].name, "PE Pants");
}

#[tokio::test]
async fn updates_leave_stock_alone() {
    let app = TestApp::new().await;
    let product = app.create_product("Art Kit", 9, dec!(520)).await;

    let updated = app
        .services
        .products
        .update_product(
            product.id,
            UpdateProductRequest {
                category: Some("Art Supplies".to_string()),
                min_stock: Some(2),
                ..Default::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.category, "Art Supplies");
    assert_eq!(updated.min_stock, Some(2));
    assert_eq!(updated.stock, 9);
    assert_eq!(app.pending_events().await, 1);

    // No effective change, no event.
    app.services
        .products
        .update_product(
            product.id,
            UpdateProductRequest {
                category: Some("Art Supplies".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("noop update");
    assert_eq!(app.pending_events().await, 1);

    let err = app
        .services
        .products
        .update_product(
            product.id,
            UpdateProductRequest {
                name: Some(" ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidArgument(_));

    let err = app
        .services
        .products
        .update_product(999, UpdateProductRequest::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn ordered_products_cannot_be_deleted() {
    let app = TestApp::new().await;
    let product = app.create_product("Thesis Binder", 4, dec!(75)).await;

    let order = app
        .services
        .orders
        .create_order(CreateOrderRequest {
            customer_name: "Gabe".to_string(),
            status: None,
            items: vec![OrderItemRequest {
                product_id: product.id,
                quantity: 1,
                price: dec!(75),
            }],
        })
        .await
        .expect("order");

    let err = app
        .services
        .products
        .delete_product(product.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::Conflict(ref msg)
            if msg == "Product 'Thesis Binder' is referenced by 1 order item(s) and cannot be deleted"
    );

    app.services.orders.delete_order(order.id).await.expect("delete order");
    app.services
        .products
        .delete_product(product.id)
        .await
        .expect("delete product");
}

#[tokio::test]
async fn deleting_a_product_removes_its_trail() {
    let app = TestApp::new().await;
    let product = app.create_product("Sketch Pad", 10, dec!(95)).await;
    let student = app.create_student("Rina Cruz").await;
    app.services.subscriptions.subscribe(student.id, product.id).await.expect("sub");
    app.services
        .ledger
        .adjust_stock(TestApp::adjustment(product.id, "remove", 2, "damage"))
        .await
        .expect("remove");
    app.flush_events().await;
    assert_eq!(
        app.services
            .notifications
            .list_for_student(student.id, false)
            .await
            .expect("inbox")
            .len(),
        1
    );

    app.services
        .products
        .delete_product(product.id)
        .await
        .expect("delete");

    assert_eq!(app.adjustment_count().await, 0);
    assert!(app
        .services
        .subscriptions
        .subscriptions_of(student.id)
        .await
        .expect("subs")
        .is_empty());
    assert!(app
        .services
        .notifications
        .list_for_student(student.id, false)
        .await
        .expect("inbox")
        .is_empty());
    assert_matches!(
        app.services.products.get_product(product.id).await,
        Err(ServiceError::NotFound(_))
    );
}
