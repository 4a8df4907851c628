//! On-air duration estimation, used by the JIT queue to size transmit slots.

use crate::types::{Bandwidth, CodeRate, DataRate, STD_FSK_PREAMBLE, STD_LORA_PREAMBLE};

/// Estimated time on air in microseconds for a packet of `size` payload
/// bytes at the given rate.
///
/// The LoRa branch follows the SX130x HAL computation symbol for symbol;
/// the FSK branch counts preamble + sync word + length byte + payload + CRC
/// at the configured bitrate.
pub fn time_on_air_us(
    datarate: DataRate,
    coderate: Option<CodeRate>,
    preamble: Option<u16>,
    size: usize,
    no_crc: bool,
) -> u32 {
    match datarate {
        DataRate::Lora { sf, bw } => {
            let preamble = preamble.unwrap_or(STD_LORA_PREAMBLE);
            let cr = coderate.unwrap_or(CodeRate::Cr4_5);
            lora_time_on_air_us(sf, bw, cr, preamble, size, no_crc)
        }
        DataRate::Fsk { bps } => {
            let preamble = preamble.unwrap_or(STD_FSK_PREAMBLE) as u64;
            // preamble + 3-byte sync word + length byte + payload + 2-byte CRC
            let bits = 8 * (preamble + 3 + 1 + size as u64 + if no_crc { 0 } else { 2 });
            let bps = bps.max(1) as u64;
            ((bits * 1_000_000) / bps) as u32
        }
    }
}

fn lora_time_on_air_us(
    sf: u8,
    bw: Bandwidth,
    cr: CodeRate,
    n_symbol_preamble: u16,
    size: usize,
    no_crc: bool,
) -> u32 {
    let bw_pow: u32 = match bw {
        Bandwidth::Khz125 => 1,
        Bandwidth::Khz250 => 2,
        Bandwidth::Khz500 => 4,
    };

    // 2^SF / BW, in microseconds
    let t_symbol_us = ((1u32 << sf) * 8 / bw_pow) as f64;

    let h: u32 = 1; // explicit header, always on for data packets
    let de: u32 = if sf >= 11 { 1 } else { 0 }; // low-datarate optimization
    let n_bit_crc: u32 = if no_crc { 0 } else { 16 };

    let numerator =
        (8 * size as i64 + n_bit_crc as i64 - 4 * sf as i64 + if sf >= 7 { 8 } else { 0 } + 20 * h as i64)
            .max(0) as f64;
    let n_symbol_payload =
        (numerator / (4 * (sf as u32 - 2 * de)) as f64).ceil() as u32 * (cr.parity() as u32 + 4);

    let n_symbol = n_symbol_preamble as f64
        + if sf >= 7 { 4.25 } else { 6.25 }
        + 8.0
        + n_symbol_payload as f64;

    (n_symbol * t_symbol_us) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sf7_reference_duration() {
        // SF7BW125, CR4/5, 8-symbol preamble, 10-byte payload with CRC:
        // about 41 ms (40.25 symbols at 1.024 ms each).
        let toa = time_on_air_us(
            DataRate::Lora { sf: 7, bw: Bandwidth::Khz125 },
            Some(CodeRate::Cr4_5),
            Some(8),
            10,
            false,
        );
        assert!((40_000..60_000).contains(&toa), "toa = {toa}");
    }

    #[test]
    fn higher_sf_is_slower() {
        let fast = time_on_air_us(
            DataRate::Lora { sf: 7, bw: Bandwidth::Khz125 },
            Some(CodeRate::Cr4_5),
            None,
            20,
            false,
        );
        let slow = time_on_air_us(
            DataRate::Lora { sf: 12, bw: Bandwidth::Khz125 },
            Some(CodeRate::Cr4_5),
            None,
            20,
            false,
        );
        assert!(slow > 10 * fast, "sf12 {slow} vs sf7 {fast}");
    }

    #[test]
    fn wider_bandwidth_is_faster() {
        let narrow = time_on_air_us(
            DataRate::Lora { sf: 9, bw: Bandwidth::Khz125 },
            Some(CodeRate::Cr4_5),
            None,
            20,
            false,
        );
        let wide = time_on_air_us(
            DataRate::Lora { sf: 9, bw: Bandwidth::Khz500 },
            Some(CodeRate::Cr4_5),
            None,
            20,
            false,
        );
        assert!(wide < narrow / 3, "bw500 {wide} vs bw125 {narrow}");
    }

    #[test]
    fn fsk_duration_scales_with_bitrate() {
        let dr = DataRate::Fsk { bps: 50_000 };
        let toa = time_on_air_us(dr, None, None, 10, false);
        // (5 + 3 + 1 + 10 + 2) * 8 bits at 50 kbps = 3360 us
        assert_eq!(toa, 3360);
    }
}
