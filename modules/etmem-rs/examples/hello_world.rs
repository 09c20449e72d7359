//! ETMEM Hello World Example - Self-Scanning Memory
//!
//! This simple example demonstrates the scan engine by:
//! 1. Allocating memory using mmap
//! 2. Scanning its own anonymous VMAs for idle-page activity
//! 3. Displaying a hot/cold breakdown
//!
//! # Running the Example
//!
//! ```bash
//! # Scan with default settings (may show huge pages for large allocations)
//! sudo cargo run --example hello_world --package etmem-rs
//!
//! # Force 4KB page scanning (disable huge pages)
//! sudo cargo run --example hello_world --package etmem-rs -- --no-huge
//! ```
//!
//! # Requirements
//!
//! - Linux kernel with the ETMEM out-of-tree module loaded
//! - CAP_SYS_ADMIN capability (root access)
//!
//! # Page Size Notes
//!
//! The kernel may use Transparent Huge Pages (THP) for large allocations,
//! causing scans to report 2MB (PMD) pages instead of 4KB (PTE) pages.
//! Use the `--no-huge` flag to disable huge page allocation via madvise.

use etmem_rs::classification::classify_by_threshold;
use etmem_rs::geometry::PageGeometry;
use etmem_rs::scan::Scanner;
use etmem_rs::types::WeightConfig;
use etmem_rs::util::{format_bytes, total_memory_size, GradeStats};
use std::env;
use std::process;

// Memory allocation size: 10 MB
const ALLOC_SIZE: usize = 10 * 1024 * 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let disable_huge_pages = args.contains(&"--no-huge".to_string());

    if args.len() > 1 && args[1] == "--help" {
        println!("Usage: hello_world [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --no-huge    Disable transparent huge pages for 4KB page granularity");
        println!("  --help       Show this help message");
        return Ok(());
    }

    if !etmem_rs::has_permission() {
        eprintln!("Error: This example requires root privileges (CAP_SYS_ADMIN)");
        eprintln!("Please run with sudo");
        std::process::exit(1);
    }

    if !etmem_rs::is_available() {
        eprintln!("Error: ETMEM is not available on this system");
        eprintln!("Please check that the kernel module is loaded");
        std::process::exit(1);
    }

    PageGeometry::init()?;

    println!("ETMEM Hello World Example");
    println!("=========================\n");

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            ALLOC_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Box::new(std::io::Error::last_os_error()));
    }
    println!(
        "Allocated {} MB of memory at {:p}",
        ALLOC_SIZE / 1024 / 1024,
        ptr
    );

    if disable_huge_pages {
        unsafe {
            libc::madvise(ptr, ALLOC_SIZE, libc::MADV_NOHUGEPAGE);
        }
        println!("Disabled transparent huge pages for this allocation");
    }

    unsafe {
        std::ptr::write_bytes(ptr, 0xAB, ALLOC_SIZE);
    }
    println!("Initialized memory (all pages touched)\n");

    let scanner = Scanner::new(WeightConfig::default());
    let pid = process::id();
    println!("Scanning pid {pid}'s anonymous VMAs (3 passes, 1s apart)...");
    let accumulated = scanner.scan(pid, 3, 1, None)?;

    let grade = classify_by_threshold(accumulated.as_slice(), WeightConfig::default().w_write);
    print_scan_results(&grade);

    unsafe {
        libc::munmap(ptr, ALLOC_SIZE);
    }
    println!("\nMemory freed. Example completed successfully!");

    Ok(())
}

/// Print a hot/cold breakdown of one scan's classification.
fn print_scan_results(grade: &etmem_rs::MemoryGrade) {
    if grade.total_len() == 0 {
        println!("No anonymous pages observed (kernel module may report nothing for a fresh mapping)");
        return;
    }

    let stats = GradeStats::from_grade(grade);
    println!("\nScan Results:");
    println!(
        "  Hot pages:  {:<8} ({})",
        stats.hot_pages,
        format_bytes(total_memory_size(&grade.hot_pages))
    );
    println!(
        "  Cold pages: {:<8} ({})",
        stats.cold_pages,
        format_bytes(total_memory_size(&grade.cold_pages))
    );
    println!("  Cold ratio: {:.1}%", stats.cold_ratio() * 100.0);
}
