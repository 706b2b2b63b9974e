use crate::arch;

pub fn handle_panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("PICNIC: {}", info.message());
    if let Some(location) = info.location() {
        log::error!(" at {}", location)
    }

    log::error!("CPU parked");
    arch::park();
}
