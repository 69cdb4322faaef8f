use std::fs;
use std::path::Path;

/// 扫描 migrations/ 目录，按文件名排序嵌入为 `MIGRATIONS`（跳过 000_ 开头的文件）
fn main() {
    println!("cargo:rerun-if-changed=migrations/");

    let out_dir = match std::env::var("OUT_DIR") {
        Ok(dir) => dir,
        Err(_) => panic!("cargo 未设置 OUT_DIR"),
    };
    let dest_path = Path::new(&out_dir).join("migrations.rs");

    let mut names: Vec<String> = fs::read_dir("migrations")
        .map(|dir| {
            dir.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| name.ends_with(".sql") && !name.starts_with("000_"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();

    let entries: Vec<String> = names
        .iter()
        .map(|file_name| {
            println!("cargo:rerun-if-changed=migrations/{}", file_name);
            format!(
                "    (\"{}\", include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/migrations/{}\")))",
                file_name.trim_end_matches(".sql"),
                file_name
            )
        })
        .collect();

    let generated = format!(
        "/// 编译时由 build.rs 生成：(迁移名, SQL)\npub const MIGRATIONS: &[(&str, &str)] = &[\n{}\n];\n",
        entries.join(",\n")
    );
    if let Err(e) = fs::write(&dest_path, generated) {
        panic!("无法写入 {:?}: {}", dest_path, e);
    }
}
