// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    // Load .env for MYORA_API_BASE before anything reads settings
    let _ = dotenvy::dotenv();

    myora_lib::run()
}
