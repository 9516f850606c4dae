//! OpenIDP Kernel — точка входа Limine
//! OpenIDP Kernel — Limine entry point
//!
//! Порядок загрузки / Boot order:
//!   0. UART + логгер, командная строка / UART + logger, command line
//!   1. GDT + IDT + PIC + PIT (прерывания выключены / interrupts off)
//!   2. HHDM, карта памяти → PMM, куча / HHDM, memory map → PMM, heap
//!   3. мастер-таблицы ядра из таблиц загрузчика / kernel master from the boot tables
//!   4. планировщик + init / scheduler + init
//!   5. корневая задача простаивает / the root task idles

#![cfg_attr(target_os = "none", no_std, no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod boot {
    use alloc::boxed::Box;
    use core::arch::asm;
    use core::panic::PanicInfo;

    use limine::memory_map::EntryType;
    use limine::request::{
        ExecutableCmdlineRequest, FramebufferRequest, HhdmRequest, MemoryMapRequest, ModuleRequest,
    };
    use limine::BaseRevision;

    use openidp_kernel::arch::x86_64::cpu::{read_cr3, X86Cpu};
    use openidp_kernel::config::{BootConfig, KERNEL_HEAP_SIZE};
    use openidp_kernel::drivers::{logger, uart};
    use openidp_kernel::kernel::{self, Kernel};
    use openidp_kernel::loader::{BootModule, BootModules};
    use openidp_kernel::mm::heap::HEAP;
    use openidp_kernel::mm::pmm::PhysFrames;
    use openidp_kernel::mm::vmm::AddressSpace;
    use openidp_kernel::mm::{self, phys_to_virt, virt_to_phys, FrameSupplier, VirtAddr};
    use openidp_kernel::sched::{Framebuffer, Scheduler};
    use openidp_kernel::{arch, kprintln};

    // ── Запросы Limine / Limine requests ─────────────────────────────────────

    #[used]
    #[link_section = ".requests"]
    static BASE_REVISION: BaseRevision = BaseRevision::new();

    #[used]
    #[link_section = ".requests"]
    static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

    #[used]
    #[link_section = ".requests"]
    static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

    #[used]
    #[link_section = ".requests"]
    static MODULE_REQUEST: ModuleRequest = ModuleRequest::new();

    #[used]
    #[link_section = ".requests"]
    static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

    #[used]
    #[link_section = ".requests"]
    static CMDLINE_REQUEST: ExecutableCmdlineRequest = ExecutableCmdlineRequest::new();

    fn halt() -> ! {
        loop {
            unsafe { asm!("cli; hlt", options(nomem, nostack)) };
        }
    }

    fn fatal(what: &str) -> ! {
        log::error!("boot: {}", what);
        halt()
    }

    /// Точка входа ядра — её вызывает Limine.
    /// Kernel entry point, called by Limine.
    #[no_mangle]
    extern "C" fn _start() -> ! {
        // 0. UART — первым делом / first of all
        uart::init();
        logger::init(log::LevelFilter::Info);
        let cmdline = CMDLINE_REQUEST
            .get_response()
            .and_then(|r| r.cmdline().to_str().ok())
            .unwrap_or("");
        let config = BootConfig::parse(cmdline);
        logger::init(config.log_level);
        log::info!("OpenIDP booting (cmdline '{}')", cmdline);

        if !BASE_REVISION.is_supported() {
            fatal("unsupported Limine base revision");
        }

        // 1. GDT + IDT + PIC + PIT
        arch::x86_64::init(config.timer_hz);

        // 2. Память / Memory
        let Some(hhdm) = HHDM_REQUEST.get_response() else {
            fatal("no HHDM response");
        };
        mm::set_hhdm_offset(hhdm.offset());

        let Some(memory_map) = MEMORY_MAP_REQUEST.get_response() else {
            fatal("no memory map");
        };
        let mut frames = PhysFrames::new();
        for entry in memory_map.entries() {
            if entry.entry_type == EntryType::USABLE {
                frames.add_region(entry.base, entry.length);
            }
        }
        let Some(heap) = frames.take_contiguous(KERNEL_HEAP_SIZE) else {
            fatal("no contiguous region for the kernel heap");
        };
        // После этого работают Box<T>, Vec<T> / After this Box<T>, Vec<T> work
        unsafe { HEAP.init(phys_to_virt(heap).as_mut_ptr(), KERNEL_HEAP_SIZE) };
        log::info!("pmm: {} frames usable", frames.total_frames());

        // 3. Мастер-таблицы / Master tables
        let mut cpu = X86Cpu;
        let master = match unsafe { AddressSpace::clone_boot(&mut frames, read_cr3()) } {
            Ok(master) => master,
            Err(err) => fatal_err("kernel master", err),
        };
        master.switch(&mut cpu);

        // 4. Файлы, framebuffer, планировщик / Files, framebuffer, scheduler
        let mut files = BootModules::new();
        if let Some(modules) = MODULE_REQUEST.get_response() {
            for file in modules.modules() {
                let Ok(path) = core::str::from_utf8(file.path()) else {
                    log::warn!("boot: module with a non-UTF-8 path skipped");
                    continue;
                };
                let data = unsafe { core::slice::from_raw_parts(file.addr(), file.size() as usize) };
                files.push(BootModule { path, data });
            }
        }

        let framebuffer = FRAMEBUFFER_REQUEST
            .get_response()
            .and_then(|r| r.framebuffers().next())
            .map(|fb| Framebuffer {
                phys:   virt_to_phys(VirtAddr(fb.addr() as u64)),
                width:  fb.width(),
                height: fb.height(),
                pitch:  fb.pitch(),
                bpp:    u64::from(fb.bpp()),
            });
        if let Some(fb) = &framebuffer {
            log::info!("fb: {}x{} @ {:#x}", fb.width, fb.height, fb.phys.0);
        }

        let sched = Scheduler::new(master);
        let boot_kernel = Kernel::new(sched, frames, cpu, Box::new(files), framebuffer);
        kernel::install(boot_kernel, |k| {
            let argv = [config.init.as_bytes()];
            if let Err(err) = k.exec(config.init, &argv, config.init_framebuffer) {
                log::error!("boot: cannot start {}: {}", config.init, err);
            }
            log::info!("boot: {} frames in use", k.frames().used_frames());
        });

        // 5. Корневая задача — простой / The root task idles
        log::info!("boot: idle");
        loop {
            arch::wait_for_interrupt();
        }
    }

    fn fatal_err(what: &str, err: openidp_kernel::Error) -> ! {
        log::error!("boot: {}: {}", what, err);
        halt()
    }

    /// Panic handler — вывод в UART и halt.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        // Владелец замка больше не выполнится / The lock holder will never run again
        unsafe { uart::force_unlock() };
        kprintln!("\n[KERNEL PANIC] {}", info);
        halt()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("openidp-kernel runs only on x86_64-unknown-none");
}
