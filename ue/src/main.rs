//! Albor Space 5G UE uplink application
//!
//! Drives the UE MAC scheduler and the PUSCH mapping chain from a slot
//! ticker. Grants are synthesized periodically so the uplink pipeline can
//! run standalone against a full-buffer traffic source.

mod config;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{FrameSlot, Rnti};
use interfaces::dci::UlDci;
use interfaces::pusch::{DmrsConfigType, McsTable, UlConfigPdu};
use interfaces::scheduled_response::{ScheduledResponse, ScheduledResponseSink};
use interfaces::InterfaceError;
use layers::mac::lcp::{LogicalChannelConfig, PBR_INFINITE};
use layers::mac::phr::PhrConfig;
use layers::mac::{TdaEntry, UeMac, UeMacConfig};
use layers::phy::dmrs::MappingType;
use layers::phy::ptrs::PtrsUplinkConfig;
use layers::phy::{available_bits, CarrierConfig, UlschTx};

use crate::config::UeConfig;

/// Albor Space 5G UE
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ue.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Slots between synthesized uplink grants
    #[arg(long, default_value = "8")]
    grant_period_slots: u32,

    /// MCS index of the synthesized grants
    #[arg(long, default_value = "9")]
    mcs: u8,

    /// RBs allocated by the synthesized grants
    #[arg(long, default_value = "20")]
    grant_rbs: u16,
}

/// Traffic source that always has data pending
struct FullBufferRlc {
    lcids: Vec<u8>,
    counter: u8,
}

impl FullBufferRlc {
    fn new(lcids: Vec<u8>) -> Self {
        Self { lcids, counter: 0 }
    }
}

impl interfaces::rlc::RlcUplink for FullBufferRlc {
    fn buffer_status(&self, lcid: u8) -> u32 {
        if self.lcids.contains(&lcid) {
            100_000
        } else {
            0
        }
    }

    fn data_request(&mut self, lcid: u8, buf: &mut [u8]) -> usize {
        if !self.lcids.contains(&lcid) {
            return 0;
        }
        for b in buf.iter_mut() {
            *b = self.counter;
            self.counter = self.counter.wrapping_add(1);
        }
        buf.len()
    }
}

/// PHY-side sink: maps every delivered PUSCH onto antenna-port grids
struct PhySink {
    ulsch: UlschTx,
    pdus_mapped: AtomicU64,
    res_mapped: AtomicU64,
}

#[async_trait]
impl ScheduledResponseSink for PhySink {
    async fn scheduled_response(&self, response: ScheduledResponse) -> Result<(), InterfaceError> {
        for pdu in &response.ul_config {
            let UlConfigPdu::Pusch(pusch) = pdu else {
                continue;
            };
            // Stand-in for the encoder chain: the transport block occupies
            // the front of the rate-matched codeword, the rest stays zero.
            let g_bytes = (available_bits(pusch) + 7) / 8;
            let mut codeword = vec![0u8; g_bytes];
            let payload = &pusch.pusch_data.tx_payload;
            let n = payload.len().min(g_bytes);
            codeword[..n].copy_from_slice(&payload[..n]);
            let grids = self
                .ulsch
                .transmit(pusch, &codeword, response.tx_slot.slot)
                .map_err(|e| InterfaceError::InvalidConfig(e.to_string()))?;
            let nonzero: usize = grids
                .iter()
                .map(|g| g.iter().filter(|re| re.re != 0 || re.im != 0).count())
                .sum();
            self.pdus_mapped.fetch_add(1, Ordering::Relaxed);
            self.res_mapped.fetch_add(nonzero as u64, Ordering::Relaxed);
            debug!(
                frame = response.tx_slot.frame,
                slot = response.tx_slot.slot,
                tb_size = pusch.pusch_data.tb_size,
                ports = grids.len(),
                "PUSCH mapped"
            );
        }
        Ok(())
    }
}

fn build_mac_config(cfg: &UeConfig) -> Result<UeMacConfig> {
    let scs = cfg.scs()?;
    let mcs_table = match cfg.pusch.mcs_table.as_str() {
        "qam64" => McsTable::Qam64,
        "qam256" => McsTable::Qam256,
        other => anyhow::bail!("invalid MCS table: {}", other),
    };
    let dmrs_config_type = match cfg.pusch.dmrs_config_type {
        1 => DmrsConfigType::Type1,
        2 => DmrsConfigType::Type2,
        other => anyhow::bail!("invalid DMRS configuration type: {}", other),
    };
    let tda_table = cfg
        .pusch
        .time_domain_allocations
        .iter()
        .map(|t| {
            let mapping_type = match t.mapping_type.as_str() {
                "typeA" => Ok(MappingType::TypeA),
                "typeB" => Ok(MappingType::TypeB),
                other => Err(anyhow::anyhow!("invalid mapping type: {}", other)),
            }?;
            Ok(TdaEntry {
                k2: t.k2,
                mapping_type,
                start_symbol: t.start_symbol,
                num_symbols: t.num_symbols,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let logical_channels = cfg
        .mac
        .logical_channels
        .iter()
        .map(|lc| LogicalChannelConfig {
            lcid: lc.lcid,
            lcg_id: lc.lcg_id,
            priority: lc.priority,
            pbr_bytes_per_ms: lc.pbr_bytes_per_ms.unwrap_or(PBR_INFINITE),
            bucket_size_ms: lc.bucket_size_ms,
        })
        .collect();

    Ok(UeMacConfig {
        rnti: Rnti::new(cfg.cell.rnti),
        scs,
        duplex_mode: cfg.duplex_mode()?,
        tdd: cfg.cell.tdd.map(Into::into),
        bwp_start: cfg.cell.bwp_start,
        bwp_size: cfg.cell.bwp_size,
        mcs_table,
        transform_precoding: cfg.pusch.transform_precoding,
        data_scrambling_id: cfg.pusch.data_scrambling_id,
        num_antenna_ports: cfg.cell.num_antenna_ports,
        max_rank: cfg.pusch.max_rank,
        tda_table,
        dmrs_config_type,
        dmrs_type_a_position: cfg.pusch.dmrs_type_a_position,
        dmrs_additional_position: cfg.pusch.dmrs_additional_position,
        ul_dmrs_scrambling_id: cfg.pusch.dmrs_scrambling_id,
        pusch_identity: cfg.pusch.pusch_identity,
        ptrs: cfg.pusch.ptrs.map(|p| PtrsUplinkConfig {
            ptrs_mcs: p.ptrs_mcs,
            freq_density: p.freq_density,
            re_offset: p.re_offset,
        }),
        logical_channels,
        periodic_bsr_timer_slots: cfg.mac.periodic_bsr_timer_slots,
        retx_bsr_timer_slots: cfg.mac.retx_bsr_timer_slots,
        phr: PhrConfig {
            periodic_timer_slots: cfg.mac.phr_periodic_timer_slots,
            prohibit_timer_slots: cfg.mac.phr_prohibit_timer_slots,
            tx_power_factor_change_db: cfg.mac.phr_tx_power_factor_change_db,
        },
        time_alignment_timer_slots: cfg.mac.time_alignment_timer_slots,
        msga: None,
    })
}

fn default_ue_config() -> Result<UeConfig> {
    // 20 MHz at 30 kHz SCS, FDD
    serde_yaml::from_str(
        r#"
cell:
  rnti: 17921
  scs_khz: 30
  bwp_size: 51
pusch: {}
"#,
    )
    .context("builtin default configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space 5G UE uplink");

    let ue_config = if Path::new(&args.config).exists() {
        let text = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", args.config))?
    } else {
        warn!(
            "configuration file {} not found, using builtin defaults",
            args.config
        );
        default_ue_config()?
    };

    let mac_config = build_mac_config(&ue_config)?;
    let scs = mac_config.scs;
    let slots_per_frame = scs.slots_per_frame();
    info!(
        rnti = mac_config.rnti.value(),
        scs_khz = scs.khz(),
        bwp_size = mac_config.bwp_size,
        "cell configuration loaded"
    );

    let lcids: Vec<u8> = mac_config
        .logical_channels
        .iter()
        .map(|lc| lc.lcid)
        .collect();
    let occupied_scs = 12 * (mac_config.bwp_start + mac_config.bwp_size) as usize;
    if ue_config.cell.fft_size < occupied_scs {
        anyhow::bail!(
            "FFT size {} too small for {} occupied subcarriers",
            ue_config.cell.fft_size,
            occupied_scs
        );
    }
    let sink = Arc::new(PhySink {
        ulsch: UlschTx::new(CarrierConfig {
            fft_size: ue_config.cell.fft_size,
            symbols_per_slot: 14,
            first_sc_offset: (ue_config.cell.fft_size - occupied_scs) / 2,
            num_tx_ports: mac_config.num_antenna_ports,
        }),
        pdus_mapped: AtomicU64::new(0),
        res_mapped: AtomicU64::new(0),
    });
    let mut mac = UeMac::new(
        mac_config,
        Box::new(FullBufferRlc::new(lcids)),
        Arc::clone(&sink) as Arc<dyn ScheduledResponseSink>,
    )?;

    // Slot ticker at the numerology's slot duration
    let slot_us = 1000u64 >> scs.mu();
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_micros(slot_us));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    // Type-1 RIV for an allocation of grant_rbs RBs starting at RB 0
    let rbs = args.grant_rbs.clamp(1, ue_config.cell.bwp_size);
    let grant_riv = ue_config.cell.bwp_size * (rbs - 1);
    let mut now = FrameSlot::new(0, 0);
    let mut slot_count: u64 = 0;
    let mut grant_count: u64 = 0;

    info!(
        grant_period = args.grant_period_slots,
        mcs = args.mcs,
        rbs = args.grant_rbs,
        "entering slot loop"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }

        // Synthesized uplink grant standing in for a decoded PDCCH; the
        // NDI toggles per HARQ process once every full round of the pool
        if slot_count % args.grant_period_slots as u64 == 0 {
            let harq_pid = (grant_count % 16) as u8;
            let ndi = ((grant_count / 16) & 1) as u8;
            grant_count += 1;
            let dci = UlDci::format0_0(grant_riv, 0, args.mcs, ndi, 0, harq_pid, 1);
            if let Err(e) = mac.handle_dci(now, dci) {
                warn!("grant dropped: {}", e);
            }
        }

        mac.ul_slot_indication(now).await?;

        slot_count += 1;
        now = now.add_slots(1, slots_per_frame);
        if slot_count % (slots_per_frame as u64 * 100) == 0 {
            info!(
                pdus = sink.pdus_mapped.load(Ordering::Relaxed),
                res = sink.res_mapped.load(Ordering::Relaxed),
                frame = now.frame,
                "uplink statistics"
            );
        }
    }

    info!(
        pdus = sink.pdus_mapped.load(Ordering::Relaxed),
        res = sink.res_mapped.load(Ordering::Relaxed),
        "UE shutdown complete"
    );
    Ok(())
}
