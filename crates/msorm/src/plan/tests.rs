use std::sync::Arc;

use super::mutation;
use super::*;
use crate::expr;
use crate::mapper;
use crate::record;
use crate::schema::{ColumnSchema, DataType, SchemaCatalog, SortOrder, TableSchema};

fn catalog() -> Arc<SchemaCatalog> {
    let region = TableSchema::builder("Region")
        .column(ColumnSchema::new("id", DataType::Int).auto_increment())
        .column(ColumnSchema::new("name", DataType::String(Some(100))))
        .primary_key("id", SortOrder::Asc)
        .foreign_key_target("customers", "Customer", "region")
        .build();
    let customer = TableSchema::builder("Customer")
        .column(ColumnSchema::new("id", DataType::Int).auto_increment())
        .column(ColumnSchema::new("name", DataType::String(Some(100))))
        .column(ColumnSchema::new("regionId", DataType::Int).nullable())
        .column(ColumnSchema::new("active", DataType::Boolean))
        .primary_key("id", SortOrder::Asc)
        .foreign_key("region", vec!["regionId".to_string()], "Region")
        .foreign_key_target("orders", "Order", "customer")
        .build();
    let order = TableSchema::builder("Order")
        .column(ColumnSchema::new("id", DataType::Int).auto_increment())
        .column(ColumnSchema::new("custId", DataType::Int))
        .column(ColumnSchema::new("amount", DataType::Int))
        .primary_key("id", SortOrder::Asc)
        .foreign_key("customer", vec!["custId".to_string()], "Customer")
        .build();
    let line = TableSchema::builder("OrderLine")
        .column(ColumnSchema::new("orderId", DataType::Int))
        .column(ColumnSchema::new("lineNo", DataType::Int))
        .column(ColumnSchema::new("sku", DataType::String(Some(50))))
        .primary_key("orderId", SortOrder::Asc)
        .primary_key("lineNo", SortOrder::Asc)
        .build();
    SchemaCatalog::builder()
        .table(region)
        .table(customer)
        .table(order)
        .table(line)
        .build()
        .unwrap()
}

fn customers() -> Queryable {
    Queryable::from_table(catalog(), "Customer").unwrap()
}

fn orders() -> Queryable {
    Queryable::from_table(catalog(), "Order").unwrap()
}

#[test]
fn test_root_projection_follows_column_order() {
    assert_eq!(
        customers().to_sql().unwrap(),
        "SELECT [TBL].[id] AS [id], [TBL].[name] AS [name], [TBL].[regionId] AS [regionId], \
         [TBL].[active] AS [active] FROM [Customer] AS [TBL]"
    );
}

#[test]
fn test_compilation_is_deterministic() {
    let plan = customers()
        .include("region")
        .unwrap()
        .find(vec![("id".to_string(), 5.into())])
        .top(3);
    assert_eq!(plan.to_sql().unwrap(), plan.to_sql().unwrap());
}

#[test]
fn test_find_literal_filter() {
    let sql = customers()
        .find(vec![("id".to_string(), 5.into())])
        .to_sql()
        .unwrap();
    assert!(sql.ends_with("WHERE ([TBL].[id] = 5)"), "{sql}");
}

#[test]
fn test_find_null_compiles_to_is_null() {
    let sql = customers()
        .find(vec![("regionId".to_string(), None::<i32>.into())])
        .to_sql()
        .unwrap();
    assert!(sql.ends_with("WHERE ([TBL].[regionId] IS NULL)"), "{sql}");
}

#[test]
fn test_include_forward_fk_compiles_to_join() {
    let sql = customers().include("region").unwrap().to_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT [TBL].[id] AS [id], [TBL].[name] AS [name], [TBL].[regionId] AS [regionId], \
         [TBL].[active] AS [active], [region].[id] AS [region.id], \
         [region].[name] AS [region.name] FROM [Customer] AS [TBL] \
         LEFT OUTER JOIN [Region] AS [region] ON (([region].[id] IS NULL AND \
         [TBL].[regionId] IS NULL) OR [region].[id] = [TBL].[regionId])"
    );
    assert!(!sql.contains("APPLY"));
}

#[test]
fn test_include_back_reference_is_multi_and_simple() {
    let plan = customers().include("orders").unwrap();
    let sql = plan.to_sql().unwrap();
    assert!(sql.contains("LEFT OUTER JOIN [Order] AS [orders] ON"), "{sql}");
    let meta = plan.select_meta();
    assert_eq!(meta.multi_paths.get("orders"), Some(&true));
}

#[test]
fn test_refined_include_compiles_to_apply() {
    let sql = customers()
        .include_with("orders", |q| Ok(q.top(3)), false)
        .unwrap()
        .to_sql()
        .unwrap();
    assert!(sql.contains("OUTER APPLY (SELECT TOP 3 "), "{sql}");
    assert!(sql.contains(") AS [orders]"), "{sql}");
    assert!(!sql.contains("JOIN [Order]"), "{sql}");
}

#[test]
fn test_inner_include_uses_inner_join() {
    let sql = customers()
        .include_with("region", Ok, true)
        .unwrap()
        .to_sql()
        .unwrap();
    assert!(sql.contains("INNER JOIN [Region] AS [region] ON"), "{sql}");
}

#[test]
fn test_chained_include_through_prior_join() {
    // Region back to its customers: path walks the earlier join alias.
    let plan = customers()
        .include("region")
        .unwrap()
        .include("region.customers")
        .unwrap();
    let sql = plan.to_sql().unwrap();
    assert!(sql.contains("[region.customers]"), "{sql}");
    let meta = plan.select_meta();
    assert_eq!(meta.multi_paths.get("region.customers"), Some(&true));
}

#[test]
fn test_include_unknown_path_is_schema_error() {
    let err = customers().include("nope").unwrap_err();
    assert!(err.is_schema());
}

#[test]
fn test_include_on_union_is_usage_error() {
    let cat = catalog();
    let union = Queryable::union_all(cat, vec![customers(), customers()]).unwrap();
    assert!(union.include("region").unwrap_err().is_usage());
}

#[test]
fn test_second_select_wraps_previous_projection() {
    let sql = customers()
        .select(|e| vec![("nm".to_string(), e.col("name").into())])
        .select(|e| vec![("nm2".to_string(), e.col("nm").into())])
        .to_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT [TBL].[nm] AS [nm2] FROM (SELECT [TBL].[name] AS [nm] \
         FROM [Customer] AS [TBL]) AS [TBL]"
    );
}

#[test]
fn test_predicate_casts_in_select_but_not_in_where() {
    let selected = customers()
        .select(|e| {
            vec![(
                "isBig".to_string(),
                expr::greater_than(e.col("id"), 100).into(),
            )]
        })
        .to_sql()
        .unwrap();
    assert!(
        selected.contains("CASE WHEN ([TBL].[id] > 100) THEN 1 ELSE 0 END AS [isBig]"),
        "{selected}"
    );

    let filtered = customers()
        .filter(|e| vec![expr::greater_than(e.col("id"), 100)])
        .to_sql()
        .unwrap();
    assert!(filtered.ends_with("WHERE ([TBL].[id] > 100)"), "{filtered}");
    assert!(!filtered.contains("CASE WHEN"));
}

#[test]
fn test_group_by_select_routes_filter_to_having() {
    let grouped = orders().group_by_select(
        |e| vec![("custId".to_string(), e.col("custId").into())],
        |e| vec![("total".to_string(), expr::sum(e.col("amount")).into())],
    );
    let sql = grouped.to_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT [TBL].[custId] AS [custId], SUM([TBL].[amount]) AS [total] \
         FROM [Order] AS [TBL] GROUP BY [TBL].[custId]"
    );

    let with_having = grouped
        .filter(|e| vec![expr::greater_than(e.col("total"), 100)])
        .to_sql()
        .unwrap();
    assert!(
        with_having.ends_with("GROUP BY [TBL].[custId] HAVING (SUM([TBL].[amount]) > 100)"),
        "{with_having}"
    );
    assert!(!with_having.contains("WHERE"));
}

#[test]
fn test_limit_compiles_row_number_pagination() {
    let sql = customers()
        .limit(10, 5, |e| vec![(e.col("name").into(), SortOrder::Asc)])
        .to_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT [TBL].[id] AS [id], [TBL].[name] AS [name], [TBL].[regionId] AS [regionId], \
         [TBL].[active] AS [active] FROM (SELECT TOP 15 [TBL].[id] AS [id], \
         [TBL].[name] AS [name], [TBL].[regionId] AS [regionId], [TBL].[active] AS [active], \
         ROW_NUMBER() OVER (ORDER BY [TBL].[name] ASC) AS [__rownum__] \
         FROM [Customer] AS [TBL]) AS [TBL] WHERE ([TBL].[__rownum__] > 10)"
    );
}

#[test]
fn test_distinct_top_ordering() {
    let sql = customers()
        .distinct()
        .top(5)
        .order_by(|e| vec![(e.col("name").into(), SortOrder::Desc)])
        .to_sql()
        .unwrap();
    assert!(sql.starts_with("SELECT DISTINCT TOP 5 "), "{sql}");
    assert!(sql.ends_with("ORDER BY [TBL].[name] DESC"), "{sql}");
}

#[test]
fn test_union_all_renders_one_derived_source() {
    let cat = catalog();
    let member = || {
        Queryable::from_table(cat.clone(), "Region")
            .unwrap()
            .select(|e| vec![("id".to_string(), e.col("id").into())])
    };
    let sql = Queryable::union_all(cat.clone(), vec![member(), member()])
        .unwrap()
        .to_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT [TBL].[id] AS [id] FROM (SELECT [TBL].[id] AS [id] FROM [Region] AS [TBL] \
         UNION ALL SELECT [TBL].[id] AS [id] FROM [Region] AS [TBL]) AS [TBL]"
    );
}

#[test]
fn test_rejoining_identical_alias_is_a_no_op() {
    let once = customers().include("region").unwrap();
    let twice = once.include("region").unwrap();
    let sql = twice.to_sql().unwrap();
    assert_eq!(sql.matches("LEFT OUTER JOIN").count(), 1, "{sql}");
}

#[test]
fn test_search_requires_every_word_in_some_field() {
    let sql = customers()
        .search(Some("alpha beta"), |e| vec![e.col("name")])
        .to_sql()
        .unwrap();
    assert!(sql.contains("[TBL].[name] LIKE '%' + N'alpha' + '%'"), "{sql}");
    assert!(sql.contains("AND [TBL].[name] LIKE '%' + N'beta' + '%'"), "{sql}");

    let untouched = customers().search(Some("  "), |e| vec![e.col("name")]);
    assert_eq!(untouched.to_sql().unwrap(), customers().to_sql().unwrap());
}

#[test]
fn test_between_on_tolerates_open_bounds() {
    let sql = customers()
        .between_on("id", 5, None::<i32>)
        .to_sql()
        .unwrap();
    assert!(
        sql.ends_with(
            "WHERE (((5 IS NULL OR [TBL].[id] >= 5) AND (NULL IS NULL OR [TBL].[id] <= NULL)))"
        ),
        "{sql}"
    );
}

#[test]
fn test_mapped_include_exposes_single_object() {
    // The include('region') rowset carries dotted columns; mapping groups
    // them into one nested object, never a list.
    let plan = customers().include("region").unwrap();
    let rows = vec![vec![
        ("id".to_string(), crate::Value::I32(5)),
        ("name".to_string(), crate::Value::from("bob")),
        ("regionId".to_string(), crate::Value::I32(2)),
        ("active".to_string(), crate::Value::I32(1)),
        ("region.id".to_string(), crate::Value::I32(2)),
        ("region.name".to_string(), crate::Value::from("west")),
    ]];
    let mapped = mapper::map_rows(&plan.select_meta(), rows).unwrap();
    assert_eq!(mapped.len(), 1);
    let region = mapped[0].row("region").expect("region must be a single object");
    assert_eq!(region.get_str("name"), Some("west"));
    // boolean tag applied on read
    assert_eq!(mapped[0].get_bool("active"), Some(true));
}

// ==================== mutations ====================

#[test]
fn test_insert_outputs_single_pk() {
    let sql = mutation::insert_sql(&customers(), &record! { "name" => "bob" }).unwrap();
    assert_eq!(
        sql,
        "INSERT INTO [Customer] ([name]) OUTPUT INSERTED.[id] VALUES (N'bob');"
    );
}

#[test]
fn test_insert_with_pk_payload_toggles_identity_insert() {
    let sql =
        mutation::insert_sql(&customers(), &record! { "id" => 7, "name" => "x" }).unwrap();
    assert!(sql.contains("SET IDENTITY_INSERT [Customer] ON;"), "{sql}");
    assert!(sql.contains("SET IDENTITY_INSERT [Customer] OFF;"), "{sql}");
    assert!(
        sql.contains("SELECT [NAME] FROM SYS.IDENTITY_COLUMNS WHERE OBJECT_NAME(OBJECT_ID) = N'Customer'"),
        "{sql}"
    );
    assert!(
        sql.contains("INSERT INTO [Customer] ([id], [name]) OUTPUT INSERTED.[id] VALUES (7, N'x');"),
        "{sql}"
    );
}

#[test]
fn test_composite_pk_insert_has_no_output_clause() {
    let lines = Queryable::from_table(catalog(), "OrderLine").unwrap();
    let sql = mutation::insert_sql(
        &lines,
        &record! { "orderId" => 1, "lineNo" => 2, "sku" => "a" },
    )
    .unwrap();
    assert!(!sql.contains("OUTPUT INSERTED"), "{sql}");
}

#[test]
fn test_upsert_merge_by_primary_key() {
    let sql =
        mutation::upsert_sql(&customers(), &record! { "id" => 7, "name" => "x" }, None).unwrap();
    assert!(
        sql.contains(
            "MERGE [Customer] USING (SELECT 7 AS [id]) AS [match] ON [Customer].[id] = [match].[id] \
             WHEN MATCHED THEN UPDATE SET [Customer].[name] = N'x' \
             WHEN NOT MATCHED THEN INSERT ([id], [name]) VALUES (7, N'x') OUTPUT INSERTED.[id];"
        ),
        "{sql}"
    );
    // default keys == primary key and the payload carries it
    assert!(sql.contains("SET IDENTITY_INSERT [Customer] ON;"), "{sql}");
}

#[test]
fn test_upsert_by_non_pk_key_skips_identity_toggle() {
    let sql = mutation::upsert_sql(
        &customers(),
        &record! { "id" => 7, "name" => "x" },
        Some(&["name"]),
    )
    .unwrap();
    assert!(!sql.contains("IDENTITY_INSERT"), "{sql}");
    assert!(sql.contains("ON [Customer].[name] = [match].[name]"), "{sql}");
}

#[test]
fn test_update_diffs_and_flattens_joined_assignments() {
    let plan = customers().include("region").unwrap();
    let sql = mutation::update_sql(&plan, |e| {
        vec![
            ("name".to_string(), "x".into()),
            ("region.name".to_string(), "y".into()),
            // unchanged: assigning the current shape back diffs out
            ("active".to_string(), e.col("active").into()),
        ]
    })
    .unwrap();
    assert!(
        sql.starts_with("UPDATE [TBL] SET [name] = N'x', [region.name] = N'y' FROM ("),
        "{sql}"
    );
    assert!(sql.ends_with(") AS [TBL]"), "{sql}");
    assert!(!sql.contains("[active] ="), "{sql}");
}

#[test]
fn test_update_with_no_changes_is_usage_error() {
    let err = mutation::update_sql(&customers(), |e| {
        vec![("name".to_string(), e.col("name").into())]
    })
    .unwrap_err();
    assert!(err.is_usage());
}

#[test]
fn test_delete_correlates_composite_key_as_tuple() {
    let lines = Queryable::from_table(catalog(), "OrderLine")
        .unwrap()
        .filter(|e| vec![expr::equal(e.col("sku"), "a")]);
    let sql = mutation::delete_sql(&lines).unwrap();
    assert_eq!(
        sql,
        "DELETE FROM [OrderLine] WHERE EXISTS (SELECT 1 FROM (SELECT [TBL].[orderId] AS [orderId], \
         [TBL].[lineNo] AS [lineNo] FROM [OrderLine] AS [TBL] WHERE ([TBL].[sku] = N'a')) AS [KEYS] \
         WHERE [KEYS].[orderId] = [OrderLine].[orderId] AND [KEYS].[lineNo] = [OrderLine].[lineNo])"
    );
}

#[test]
fn test_insert_to_projects_into_target_table() {
    let target = customers();
    let sql = mutation::insert_to_sql(&orders(), &target, |e| {
        vec![("name".to_string(), e.col("custId").into())]
    })
    .unwrap();
    assert!(
        sql.starts_with("INSERT INTO [Customer] ([name]) OUTPUT INSERTED.[id] SELECT "),
        "{sql}"
    );
}

#[test]
fn test_mutations_reject_union_plans() {
    let cat = catalog();
    let union = Queryable::union_all(cat, vec![customers(), customers()]).unwrap();
    assert!(mutation::insert_sql(&union, &record! { "a" => 1 })
        .unwrap_err()
        .is_usage());
    assert!(
        mutation::upsert_sql(&union, &record! { "a" => 1 }, None)
            .unwrap_err()
            .is_usage()
    );
    assert!(mutation::delete_sql(&union).unwrap_err().is_usage());
    assert!(
        mutation::update_sql(&union, |_| vec![("a".to_string(), 1.into())])
            .unwrap_err()
            .is_usage()
    );
}

#[test]
fn test_insert_range_batches_per_record() {
    let sql = mutation::insert_range_sql(
        &customers(),
        &[record! { "name" => "a" }, record! { "name" => "b" }],
    )
    .unwrap();
    let lines: Vec<&str> = sql.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("N'a'"));
    assert!(lines[1].contains("N'b'"));
}

#[test]
fn test_entity_fallback_references_alias_path() {
    let entity = customers().entity();
    assert_eq!(entity.col("unknown").sql, "[TBL].[unknown]");
    assert_eq!(entity.col("name").sql, "[TBL].[name]");
}
