use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const CATALOG: &str = "\
kind,id,code,name,price,subtotal_price,discount_percentage,tier,product_type
product,1,CAM-01,Dash Cam,10.00,,,standard,Dash Cam
bundle,1,,Starter Kit,19.32,21.47,10,,
";

fn file_with(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_quote_guest_cart() -> Result<(), Box<dyn std::error::Error>> {
    let catalog = file_with(CATALOG);
    let cart = file_with("key,quantity,price\nbundle_1,1,\n");

    let mut cmd = Command::new(cargo_bin!("storefront"));
    cmd.arg("quote")
        .arg("--catalog")
        .arg(catalog.path())
        .arg("--cart")
        .arg(cart.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("cart: ephemeral"))
        .stdout(predicate::str::contains("Starter Kit x1 @ 19.32 = 19.32"))
        .stdout(predicate::str::contains("total_before_discount: 21.47"))
        .stdout(predicate::str::contains("bundle_discount: 2.15"))
        .stdout(predicate::str::contains("delivery_fee: 4.99"))
        .stdout(predicate::str::contains("grand_total: 24.31"))
        .stdout(predicate::str::contains("amount_minor: 2431"));

    Ok(())
}

#[test]
fn test_quote_first_time_buyer() -> Result<(), Box<dyn std::error::Error>> {
    let catalog = file_with(CATALOG);
    let cart = file_with("key,quantity,price\nbundle_1,1,\nCAM-01,2,\n");

    let mut cmd = Command::new(cargo_bin!("storefront"));
    cmd.arg("quote")
        .arg("--catalog")
        .arg(catalog.path())
        .arg("--cart")
        .arg(cart.path())
        .args(["--user-id", "7", "--first-time-buyer"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("cart: persistent"))
        .stdout(predicate::str::contains("first_time_discount: 3.93"))
        .stdout(predicate::str::contains("grand_total: 35.39"))
        .stdout(predicate::str::contains("amount_minor: 3539"));

    Ok(())
}

#[test]
fn test_quote_rejects_zero_quantity() {
    let catalog = file_with(CATALOG);
    let cart = file_with("key,quantity,price\nCAM-01,0,\n");

    let mut cmd = Command::new(cargo_bin!("storefront"));
    cmd.arg("quote")
        .arg("--catalog")
        .arg(catalog.path())
        .arg("--cart")
        .arg(cart.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Quantity must be at least 1"));
}

#[test]
fn test_delivery_fee_from_environment() {
    let catalog = file_with(CATALOG);
    let cart = file_with("key,quantity,price\nCAM-01,1,\n");

    let mut cmd = Command::new(cargo_bin!("storefront"));
    cmd.env("STOREFRONT_DELIVERY_FEE", "3.50")
        .arg("quote")
        .arg("--catalog")
        .arg(catalog.path())
        .arg("--cart")
        .arg(cart.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("grand_total: 13.50"));
}

#[test]
fn test_replay_without_orders() {
    let events = file_with(concat!(
        r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","metadata":{"order_id":"1"}}}}"#,
        "\n",
        "this is not json\n",
        r#"{"id":"evt_2","type":"charge.refunded","data":{"object":{}}}"#,
        "\n",
    ));

    let mut cmd = Command::new(cargo_bin!("storefront"));
    cmd.arg("replay").arg("--events").arg(events.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "event_id,order_id,payment_status,is_paid",
        ))
        .stdout(predicate::str::contains("evt_1,,,false"))
        .stdout(predicate::str::contains("evt_2,,,false"))
        .stderr(predicate::str::contains("Error reading event"));
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_db_path_without_rocksdb_falls_back() {
    let events = file_with("");
    let dir = tempfile::tempdir().unwrap();

    let mut cmd = Command::new(cargo_bin!("storefront"));
    cmd.arg("replay")
        .arg("--events")
        .arg(events.path())
        .arg("--db-path")
        .arg(dir.path().join("db"));

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING: --db-path ignored"));
}
