use std::path::PathBuf;
use std::process::Command;

fn cli_exe() -> &'static str {
    env!("CARGO_BIN_EXE_facturec")
}

fn unique_temp_path(prefix: &str, extension: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    path.push(format!("{prefix}-{nonce}.{extension}"));
    path
}

const CONFIG_JSON: &str = r#"{
  "ruc": "1790012345001",
  "legal_name": "ACME CIA. LTDA.",
  "trade_name": "ACME",
  "head_office_address": "Av. Amazonas N34-111, Quito",
  "special_taxpayer": null,
  "keeps_accounting": true,
  "environment": "Test",
  "emission_type": "Normal",
  "email": "facturacion@acme.ec",
  "certificate_id": null
}"#;

const DRAFT_JSON: &str = r#"{
  "sequential": "001001123",
  "issue_date": "2024-05-09",
  "buyer": {
    "identification_type": "07",
    "name": "CONSUMIDOR FINAL",
    "identification": "9999999999999"
  },
  "line_items": [
    {
      "main_code": "P1",
      "description": "Producto de prueba",
      "quantity": 2.0,
      "unit_price": 10.0,
      "taxes": [{ "code": "2", "rate_code": "2", "rate": 12.0 }]
    }
  ],
  "payment_methods": ["01"]
}"#;

#[test]
fn access_key_command_prints_deterministic_key() {
    let output = Command::new(cli_exe())
        .args([
            "access-key",
            "--date",
            "2024-05-09",
            "--sequential",
            "001001123",
            "--ruc",
            "1790012345001",
            "--environment",
            "pruebas",
            "--numeric-code",
            "12345678",
        ])
        .output()
        .expect("run access-key command");

    assert!(
        output.status.success(),
        "access-key command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        "0905202401179001234500110010010000001231234567814"
    );
}

#[test]
fn assemble_command_emits_factura_xml() {
    let config_path = unique_temp_path("facturec-config", "json");
    let draft_path = unique_temp_path("facturec-draft", "json");
    std::fs::write(&config_path, CONFIG_JSON).expect("write config");
    std::fs::write(&draft_path, DRAFT_JSON).expect("write draft");

    let output = Command::new(cli_exe())
        .args([
            "assemble",
            "--invoice",
            draft_path.to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
        ])
        .output()
        .expect("run assemble command");

    assert!(
        output.status.success(),
        "assemble command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let xml = String::from_utf8_lossy(&output.stdout);
    assert!(xml.contains("<factura id=\"comprobante\" version=\"1.0.0\">"));
    assert!(xml.contains("<razonSocial>ACME CIA. LTDA.</razonSocial>"));
    assert!(xml.contains("<importeTotal>22.40</importeTotal>"));

    let _ = std::fs::remove_file(config_path);
    let _ = std::fs::remove_file(draft_path);
}

#[test]
fn sign_command_envelopes_the_document() {
    let config_path = unique_temp_path("facturec-config", "json");
    let draft_path = unique_temp_path("facturec-draft", "json");
    std::fs::write(&config_path, CONFIG_JSON).expect("write config");
    std::fs::write(&draft_path, DRAFT_JSON).expect("write draft");

    let assemble = Command::new(cli_exe())
        .args([
            "assemble",
            "--invoice",
            draft_path.to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
        ])
        .output()
        .expect("run assemble command");
    assert!(assemble.status.success());

    let unsigned_path = unique_temp_path("facturec-unsigned", "xml");
    let cert_path = unique_temp_path("facturec-cert", "p12");
    let metadata_path = unique_temp_path("facturec-metadata", "json");
    std::fs::write(&unsigned_path, &assemble.stdout).expect("write unsigned");
    std::fs::write(&cert_path, [0x01u8, 0x02, 0x03]).expect("write cert");
    std::fs::write(
        &metadata_path,
        r#"{
          "subject": "CN=CONTRIBUYENTE PRUEBA, C=EC",
          "issuer": "CN=AC SUBCA-1, C=EC",
          "serial": "123456789",
          "valid_from": "2024-01-01T00:00:00Z",
          "valid_to": "2026-01-01T00:00:00Z"
        }"#,
    )
    .expect("write metadata");

    let output = Command::new(cli_exe())
        .args([
            "sign",
            "--invoice",
            unsigned_path.to_str().unwrap(),
            "--certificate",
            cert_path.to_str().unwrap(),
            "--passphrase",
            "s3cret",
            "--metadata",
            metadata_path.to_str().unwrap(),
        ])
        .output()
        .expect("run sign command");

    assert!(
        output.status.success(),
        "sign command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let signed = String::from_utf8_lossy(&output.stdout);
    assert!(signed.contains("<ds:Signature"));
    assert!(signed.trim_end().ends_with("</factura>"));

    let _ = std::fs::remove_file(config_path);
    let _ = std::fs::remove_file(draft_path);
    let _ = std::fs::remove_file(unsigned_path);
    let _ = std::fs::remove_file(cert_path);
    let _ = std::fs::remove_file(metadata_path);
}

#[test]
fn access_key_rejects_bad_sequential() {
    let output = Command::new(cli_exe())
        .args([
            "access-key",
            "--date",
            "2024-05-09",
            "--sequential",
            "123",
            "--ruc",
            "1790012345001",
        ])
        .output()
        .expect("run access-key command");
    assert!(!output.status.success());
}
