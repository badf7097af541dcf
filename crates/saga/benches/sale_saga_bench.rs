use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Cart, CartLine, Money, StockItem};
use saga::{
    CoordinatorConfig, CreateSaleRequest, IdempotencyGuard, InMemoryInventoryService,
    InMemoryLedgerService, RetryPolicy, SaleCoordinator, StockValidator,
};
use saga_store::{InMemorySagaStore, SaleId, SagaOperation};

const PLENTY: u32 = 1_000_000_000;

fn inventory() -> InMemoryInventoryService {
    InMemoryInventoryService::new()
        .with_product("BREAD", "Bread", Money::from_cents(250), PLENTY)
        .with_product("ROLL", "Roll", Money::from_cents(80), PLENTY)
        .with_product("CAKE", "Cake", Money::from_cents(900), PLENTY)
}

fn coordinator()
-> SaleCoordinator<InMemorySagaStore, InMemoryInventoryService, InMemoryLedgerService> {
    SaleCoordinator::with_config(
        InMemorySagaStore::new(),
        inventory(),
        InMemoryLedgerService::new(),
        CoordinatorConfig {
            retry: RetryPolicy::immediate(3),
            ..CoordinatorConfig::default()
        },
    )
}

fn cart_lines() -> Vec<CartLine> {
    vec![
        CartLine::new("BREAD", 2),
        CartLine::new("ROLL", 6),
        CartLine::new("CAKE", 1),
    ]
}

fn bench_create_sale(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = coordinator();

    c.bench_function("saga/create_sale_3_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator
                    .create_sale(CreateSaleRequest::new(cart_lines()))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_create_then_cancel(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = coordinator();

    c.bench_function("saga/create_then_cancel", |b| {
        b.iter(|| {
            rt.block_on(async {
                let receipt = coordinator
                    .create_sale(CreateSaleRequest::new(cart_lines()))
                    .await
                    .unwrap();
                coordinator.cancel_sale(receipt.sale.id).await.unwrap();
            });
        });
    });
}

fn bench_validate_cart(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let validator = StockValidator::new(inventory(), RetryPolicy::immediate(1));
    let cart = Cart::new(cart_lines()).unwrap();

    c.bench_function("saga/validate_cart", |b| {
        b.iter(|| {
            rt.block_on(async {
                validator.validate(&cart).await.unwrap();
            });
        });
    });
}

fn bench_guard_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let guard = IdempotencyGuard::new(InMemorySagaStore::new());
    let sale_id = SaleId::new();
    let items = vec![StockItem::new("BREAD", 2)];

    rt.block_on(async {
        let _: Vec<StockItem> = guard
            .apply(sale_id, SagaOperation::Create, || async { Ok(items.clone()) })
            .await
            .unwrap();
    });

    c.bench_function("saga/guard_cached_replay", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _: Vec<StockItem> = guard
                    .apply(sale_id, SagaOperation::Create, || async {
                        Ok(Vec::new())
                    })
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_create_sale,
    bench_create_then_cancel,
    bench_validate_cart,
    bench_guard_replay
);
criterion_main!(benches);
