//! PTRS resource determination for PUSCH
//!
//! Time/frequency density selection according to 3GPP TS 38.214 Section
//! 6.2.3.1 and resource-element placement according to TS 38.211 Section
//! 6.4.1.2.2.

/// PTRS-UplinkConfig thresholds from RRC
#[derive(Debug, Clone, Copy)]
pub struct PtrsUplinkConfig {
    /// MCS thresholds ptrs-MCS1..3 selecting the time density
    pub ptrs_mcs: [u8; 3],
    /// RB thresholds [N_RB0, N_RB1] selecting the frequency density
    pub freq_density: [u16; 2],
    /// Resource-element offset selection (0-3)
    pub re_offset: u8,
}

/// Densities selected for a given allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtrsDensities {
    /// Time density L_ptrs in symbols
    pub time_density: u8,
    /// Frequency density K_ptrs in RB
    pub freq_density: u8,
}

/// Select PTRS densities for the scheduled MCS and RB count. Returns
/// `None` when the thresholds disable PTRS for this allocation.
pub fn select_densities(
    config: &PtrsUplinkConfig,
    mcs: u8,
    rb_size: u16,
) -> Option<PtrsDensities> {
    let time_density = if mcs >= config.ptrs_mcs[2] {
        1
    } else if mcs >= config.ptrs_mcs[1] {
        2
    } else if mcs >= config.ptrs_mcs[0] {
        4
    } else {
        return None;
    };

    let freq_density = if rb_size >= config.freq_density[1] {
        4
    } else if rb_size >= config.freq_density[0] {
        2
    } else {
        return None;
    };

    Some(PtrsDensities {
        time_density,
        freq_density,
    })
}

/// Bitmap of symbols carrying PTRS. Counting restarts after every DMRS
/// symbol, so PTRS appears every `l_ptrs`-th symbol since the last
/// reference.
pub fn ptrs_symbol_mask(
    start_symbol: u8,
    num_symbols: u8,
    l_ptrs: u8,
    dmrs_symb_pos: u16,
) -> u16 {
    if l_ptrs == 0 {
        return 0;
    }
    let last_symbol = (start_symbol + num_symbols - 1) as i32;
    let mut mask = 0u16;
    let mut l_ref = start_symbol as i32;
    let mut i = 0i32;

    while l_ref + i * l_ptrs as i32 <= last_symbol {
        // Restart counting from the most recent DMRS symbol in the window
        let lower = std::cmp::max(l_ref + (i - 1) * l_ptrs as i32 + 1, l_ref);
        let mut dmrs_in_window = None;
        let mut l = l_ref + i * l_ptrs as i32;
        while l >= lower {
            if (dmrs_symb_pos >> l) & 1 == 1 {
                dmrs_in_window = Some(l);
                break;
            }
            l -= 1;
        }
        if let Some(l_dmrs) = dmrs_in_window {
            l_ref = l_dmrs;
            i = 1;
            continue;
        }
        mask |= 1 << (l_ref + i * l_ptrs as i32);
        i += 1;
    }
    mask
}

/// First subcarrier carrying PTRS within the allocation
/// (TS 38.211 Section 6.4.1.2.2.1)
pub fn first_ptrs_re(rnti: u16, k_ptrs: u8, nb_rb: u16, k_re_ref: u8) -> u16 {
    let k_rb_ref = if nb_rb % k_ptrs as u16 == 0 {
        rnti % k_ptrs as u16
    } else {
        rnti % (nb_rb % k_ptrs as u16)
    };
    k_re_ref as u16 + k_rb_ref * 12
}
