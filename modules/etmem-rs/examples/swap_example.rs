//! ETMEM Swap Example - Simple Page Swapping
//!
//! This example demonstrates the scan-then-swap pipeline:
//! 1. Allocate 10MB of memory using mmap
//! 2. Scan twice to identify pages idle since the first pass
//! 3. Swap out the idle pages
//! 4. Verify swap by reading /proc/self/smaps
//!
//! # Running the Example
//!
//! ```bash
//! sudo cargo run --example swap_example --package etmem-rs
//! ```

use etmem_rs::classification::classify_by_threshold;
use etmem_rs::geometry::PageGeometry;
use etmem_rs::scan::Scanner;
use etmem_rs::swap::{SwapSession, SwapcacheConfig};
use etmem_rs::types::{SwapConfig, WeightConfig};
use std::env;
use std::process;

// Memory allocation size: 10 MB
const ALLOC_SIZE: usize = 10 * 1024 * 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::args().any(|arg| arg == "--help") {
        println!("Usage: swap_example");
        println!();
        println!("Simple ETMEM swap example that:");
        println!("  1. Allocates 10MB of memory");
        println!("  2. Scans twice to identify pages idle since the first pass");
        println!("  3. Swaps out the idle pages");
        println!("  4. Verifies swap via /proc/self/smaps");
        return Ok(());
    }

    if !etmem_rs::has_permission() {
        eprintln!("Error: This example requires root privileges (CAP_SYS_ADMIN)");
        eprintln!("Please run with sudo");
        std::process::exit(1);
    }

    if !etmem_rs::is_available() {
        eprintln!("Error: ETMEM is not available on this system");
        eprintln!("Please ensure the kernel module is loaded");
        std::process::exit(1);
    }

    PageGeometry::init()?;

    println!("ETMEM Swap Example");
    println!("==================\n");

    println!("Enabling kernel swap...");
    if let Err(e) = SwapcacheConfig::enable() {
        eprintln!("Warning: Failed to enable kernel swap: {}", e);
        eprintln!("This is expected if swap is already enabled.");
    } else {
        println!("Kernel swap enabled\n");
    }

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

    let start_addr = ptr as u64;
    let end_addr = start_addr + ALLOC_SIZE as u64;

    println!(
        "Allocated {} MB at 0x{:x}-0x{:x}",
        ALLOC_SIZE / 1024 / 1024,
        start_addr,
        end_addr
    );

    unsafe {
        std::ptr::write_bytes(ptr, 0xAB, ALLOC_SIZE);
    }
    println!("Touched all pages to ensure they're mapped");

    let baseline = get_swap_for_range(start_addr, end_addr);
    println!("\nBaseline swap: {} KB", baseline / 1024);

    // Step 1: scan twice. A page that wasn't touched between the two
    // passes reports with idle weight (0 under the default WeightConfig),
    // which is how we tell it apart from a page that's still hot.
    println!("\nScanning pages to identify idle pages...");
    let scanner = Scanner::new(WeightConfig::default());
    let pid = process::id();

    let _ = scanner.scan(pid, 1, 0, None)?;

    println!("Waiting 2 seconds for pages to become idle...");
    std::thread::sleep(std::time::Duration::from_secs(2));

    let accumulated = scanner.scan(pid, 1, 0, None)?;
    let grade = classify_by_threshold(accumulated.as_slice(), 1);
    let idle_pages: Vec<u64> = grade
        .cold_pages
        .iter()
        .map(|r| r.addr)
        .filter(|addr| *addr >= start_addr && *addr < end_addr)
        .collect();
    println!(
        "Found {} idle pages out of {} total in our allocation",
        idle_pages.len(),
        accumulated.len()
    );

    // Step 2: create swap session and swap out idle pages
    let swap_config = SwapConfig::default();
    let mut session = SwapSession::new(pid, swap_config)?;

    println!("\nSwapping out {} idle pages...", idle_pages.len());

    let mut added = 0;
    for addr in &idle_pages {
        if session.add_address(*addr).is_ok() {
            added += 1;
        }
    }
    println!("Added {} pages to swap session", added);

    let flushed = session.flush()?;
    println!("Final flush: {} pages", flushed);
    println!("Total pages sent to kernel: {}", added);

    std::thread::sleep(std::time::Duration::from_millis(200));

    let final_swap = get_swap_for_range(start_addr, end_addr);
    let swapped_amount = final_swap.saturating_sub(baseline);

    println!("\n========================================");
    println!("Results:");
    println!("  Baseline swap:  {} KB", baseline / 1024);
    println!("  Final swap:     {} KB", final_swap / 1024);
    println!(
        "  Swapped out:    {} KB ({} MB)",
        swapped_amount / 1024,
        swapped_amount / 1024 / 1024
    );
    println!(
        "  Expected:       {} KB ({} MB)",
        ALLOC_SIZE / 1024,
        ALLOC_SIZE / 1024 / 1024
    );

    if swapped_amount >= ALLOC_SIZE as u64 {
        println!("\nSUCCESS: all pages were swapped out");
    } else if swapped_amount > 0 {
        let pct = (swapped_amount as f64 / ALLOC_SIZE as f64) * 100.0;
        println!("\nPARTIAL: only {:.1}% of pages swapped", pct);
    } else {
        println!("\nNo pages were swapped to disk");
        println!("  Note: this may be expected if:");
        println!("    - Swap space is not configured (check with 'swapon -s')");
        println!("    - Kernel is not configured to swap anonymous pages");
        println!("    - The ETMEM swap feature has additional requirements");
    }
    println!("========================================");

    unsafe {
        libc::munmap(ptr, ALLOC_SIZE);
    }
    println!("\nMemory freed.");

    Ok(())
}

/// Get swap usage for a memory range from /proc/self/smaps
fn get_swap_for_range(start: u64, end: u64) -> u64 {
    let smaps = match std::fs::read_to_string("/proc/self/smaps") {
        Ok(content) => content,
        Err(_) => return 0,
    };

    let mut total_swap = 0u64;
    let mut in_range = false;

    for line in smaps.lines() {
        if line.contains('-') && line.contains(':') {
            in_range = false;
            if let Some((addr_part, _)) = line.split_once(' ')
                && let Some((range_start, range_end)) = addr_part.split_once('-')
                && let (Ok(rs), Ok(re)) = (u64::from_str_radix(range_start, 16), u64::from_str_radix(range_end, 16))
            {
                if rs <= end && re >= start {
                    in_range = true;
                }
            }
        }

        if in_range
            && line.starts_with("Swap:")
            && let Some(kb_part) = line.split_whitespace().nth(1)
            && let Ok(kb) = kb_part.parse::<u64>()
        {
            total_swap += kb * 1024;
        }
    }

    total_swap
}
