// Intra-month derived columns: null-safe card/investment totals and guarded
// ratios. Structurally simple, driven by a static catalog so the column set
// stays auditable in one place.

use std::collections::BTreeMap;

use churn_core::{ChurnError, Result};
use polars::prelude::*;
use tracing::{debug, info};

use crate::optional_numeric;

/// `ifnull(a, 0) + ifnull(b, 0)`: a missing operand counts as zero, the sum
/// itself is never null.
fn null_safe_sum(a: Option<f64>, b: Option<f64>) -> f64 {
    a.unwrap_or(0.0) + b.unwrap_or(0.0)
}

/// Guarded division: null when the denominator is null or zero.
fn safe_div(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let d = b.unwrap_or(0.0);
    if d == 0.0 {
        None
    } else {
        Some(a.unwrap_or(0.0) / d)
    }
}

fn null_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn null_min(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// (output, left, right) null-safe sums. Later entries may reference earlier
/// outputs.
const SUMS: &[(&str, &str, &str)] = &[
    ("tc_consumo_total", "mtarjeta_visa_consumo", "mtarjeta_master_consumo"),
    ("tc_financiacionlimite_total", "Master_mfinanciacion_limite", "Visa_mfinanciacion_limite"),
    ("tc_saldopesos_total", "Master_msaldopesos", "Visa_msaldopesos"),
    ("tc_saldodolares_total", "Master_msaldodolares", "Visa_msaldodolares"),
    ("tc_consumopesos_total", "Master_mconsumospesos", "Visa_mconsumospesos"),
    ("tc_consumodolares_total", "Master_mconsumosdolares", "Visa_mconsumosdolares"),
    ("tc_limitecompra_total", "Master_mlimitecompra", "Visa_mlimitecompra"),
    ("tc_adelantopesos_total", "Master_madelantopesos", "Visa_madelantopesos"),
    ("tc_adelantodolares_total", "Master_madelantodolares", "Visa_madelantodolares"),
    ("tc_adelanto_total", "tc_adelantopesos_total", "tc_adelantodolares_total"),
    ("tc_pagado_total", "Master_mpagado", "Visa_mpagado"),
    ("tc_pagadopesos_total", "Master_mpagospesos", "Visa_mpagospesos"),
    ("tc_pagadodolares_total", "Master_mpagosdolares", "Visa_mpagosdolares"),
    ("tc_saldototal_total", "Master_msaldototal", "Visa_msaldototal"),
    ("tc_consumototal_total", "Master_mconsumototal", "Visa_mconsumototal"),
    ("tc_cconsumos_total", "Master_cconsumos", "Visa_cconsumos"),
    ("tc_morosidad_total", "Master_delinquency", "Visa_delinquency"),
    ("m_plazofijo_total", "mplazo_fijo_dolares", "mplazo_fijo_pesos"),
    ("m_inversion1_total", "minversion1_dolares", "minversion1_pesos"),
    ("m_payroll_total", "mpayroll", "mpayroll2"),
    ("c_payroll_total", "cpayroll_trx", "cpayroll2_trx"),
    ("c_seguros_vida_auto", "cseguro_vida", "cseguro_auto"),
    ("c_seguros_hogar", "c_seguros_vida_auto", "cseguro_vivienda"),
    ("c_seguros_total", "c_seguros_hogar", "cseguro_accidentes_personales"),
];

/// (output, numerator, denominator) guarded ratios; may reference sums.
const RATIOS: &[(&str, &str, &str)] = &[
    ("m_promedio_plazofijo_total", "m_plazofijo_total", "cplazo_fijo"),
    ("m_promedio_inversion_total", "m_inversion1_total", "cinversion1"),
    ("m_promedio_caja_ahorro", "mcaja_ahorro", "ccaja_ahorro"),
    ("m_promedio_tarjeta_visa_consumo_por_transaccion", "mtarjeta_visa_consumo", "ctarjeta_visa_transacciones"),
    ("m_promedio_tarjeta_master_consumo_por_transaccion", "mtarjeta_master_consumo", "ctarjeta_master_transacciones"),
    ("m_promedio_prestamos_prendarios", "mprestamos_prendarios", "cprestamos_prendarios"),
    ("m_promedio_prestamos_hipotecarios", "mprestamos_hipotecarios", "cprestamos_hipotecarios"),
    ("m_promedio_inversion2", "minversion2", "cinversion2"),
    ("m_promedio_pagodeservicios", "mpagodeservicios", "cpagodeservicios"),
    ("m_promedio_pagomiscuentas", "mpagomiscuentas", "cpagomiscuentas"),
    ("m_promedio_cajeros_propios_descuentos", "mcajeros_propios_descuentos", "ccajeros_propios_descuentos"),
    ("m_promedio_tarjeta_visa_descuentos", "mtarjeta_visa_descuentos", "ctarjeta_visa_descuentos"),
    ("m_promedio_tarjeta_master_descuentos", "mtarjeta_master_descuentos", "ctarjeta_master_descuentos"),
    ("m_promedio_comisiones_mantenimiento", "mcomisiones_mantenimiento", "ccomisiones_mantenimiento"),
    ("m_promedio_comisiones_otras", "mcomisiones_otras", "ccomisiones_otras"),
    ("m_promedio_forex_buy", "mforex_buy", "cforex_buy"),
    ("m_promedio_forex_sell", "mforex_sell", "cforex_sell"),
    ("m_promedio_transferencias_recibidas", "mtransferencias_recibidas", "ctransferencias_recibidas"),
    ("m_promedio_transferencias_emitidas", "mtransferencias_emitidas", "ctransferencias_emitidas"),
    ("m_promedio_extraccion_autoservicio", "mextraccion_autoservicio", "cextraccion_autoservicio"),
    ("m_promedio_cheques_depositados", "mcheques_depositados", "ccheques_depositados"),
    ("m_promedio_cheques_emitidos", "mcheques_emitidos", "ccheques_emitidos"),
    ("m_promedio_cheques_depositados_rechazados", "mcheques_depositados_rechazados", "ccheques_depositados_rechazados"),
    ("m_promedio_cheques_emitidos_rechazados", "mcheques_emitidos_rechazados", "ccheques_emitidos_rechazados"),
    ("m_promedio_atm", "matm", "catm_trx"),
    ("m_promedio_atm_other", "matm_other", "catm_trx_other"),
    ("proporcion_financiacion_master_cubierto", "Master_msaldototal", "Master_mfinanciacion_limite"),
    ("proporcion_limite_master_cubierto", "Master_msaldototal", "Master_mlimitecompra"),
    ("proporcion_financiacion_visa_cubierto", "Visa_msaldototal", "Visa_mfinanciacion_limite"),
    ("proporcion_limite_visa_cubierto", "Visa_msaldototal", "Visa_mlimitecompra"),
    ("proporcion_financiacion_total_cubierto", "tc_saldototal_total", "tc_financiacionlimite_total"),
    ("proporcion_limite_total_cubierto", "tc_saldototal_total", "tc_limitecompra_total"),
    ("tc_proporcion_saldo_pesos", "tc_saldopesos_total", "tc_saldototal_total"),
    ("tc_proporcion_saldo_dolares", "tc_saldodolares_total", "tc_saldototal_total"),
    ("tc_proporcion_consumo_pesos", "tc_consumopesos_total", "tc_consumototal_total"),
    ("tc_proporcion_consumo_dolares", "tc_consumodolares_total", "tc_consumototal_total"),
    ("tc_proporcion_consumo_total_limite_total_cubierto", "tc_consumototal_total", "tc_limitecompra_total"),
    ("tc_proporcion_pago_pesos", "tc_pagadopesos_total", "tc_pagado_total"),
    ("tc_proporcion_pago_dolares", "tc_pagadodolares_total", "tc_pagado_total"),
    ("tc_proporcion_adelanto_pesos", "tc_adelantopesos_total", "tc_adelanto_total"),
    ("tc_proporcion_adelanto_dolares", "tc_adelantodolares_total", "tc_adelanto_total"),
];

/// (max output, min output, left, right) date comparisons Master vs Visa.
const EXTREMES: &[(&str, &str, &str, &str)] = &[
    ("tc_fvencimiento_mayor", "tc_fvencimiento_menor", "Master_Fvencimiento", "Visa_Fvencimiento"),
    ("tc_fechaalta_mayor", "tc_fechaalta_menor", "Master_fechaalta", "Visa_fechaalta"),
    ("tc_fechamora_mayor", "tc_fechamora_menor", "Master_Finiciomora", "Visa_Finiciomora"),
    ("tc_fechacierre_mayor", "tc_fechacierre_menor", "Master_fultimo_cierre", "Visa_fultimo_cierre"),
];

struct ColumnPool<'a> {
    df: &'a DataFrame,
    derived: BTreeMap<String, Vec<Option<f64>>>,
}

impl<'a> ColumnPool<'a> {
    fn get(&self, name: &str) -> Option<Vec<Option<f64>>> {
        if let Some(values) = self.derived.get(name) {
            return Some(values.clone());
        }
        optional_numeric(self.df, name)
    }
}

/// Apply the whole catalog. Outputs whose inputs are absent from the dataset
/// are skipped quietly (the upstream extract decides which card products
/// exist); everything else lands as new columns on a new frame.
pub fn apply_intra_month(df: DataFrame) -> Result<DataFrame> {
    let n = df.height();
    let mut pool = ColumnPool {
        df: &df,
        derived: BTreeMap::new(),
    };
    let mut order: Vec<(String, Vec<Option<f64>>)> = Vec::new();
    let mut skipped = 0usize;

    for (out, left, right) in SUMS {
        match (pool.get(left), pool.get(right)) {
            (Some(a), Some(b)) => {
                let values: Vec<Option<f64>> = (0..n)
                    .map(|i| Some(null_safe_sum(a[i], b[i])))
                    .collect();
                pool.derived.insert(out.to_string(), values.clone());
                order.push((out.to_string(), values));
            }
            _ => {
                debug!("Skipping derived sum {}: inputs not present", out);
                skipped += 1;
            }
        }
    }

    for (out, num, den) in RATIOS {
        match (pool.get(num), pool.get(den)) {
            (Some(a), Some(b)) => {
                let values: Vec<Option<f64>> =
                    (0..n).map(|i| safe_div(a[i], b[i])).collect();
                pool.derived.insert(out.to_string(), values.clone());
                order.push((out.to_string(), values));
            }
            _ => {
                debug!("Skipping derived ratio {}: inputs not present", out);
                skipped += 1;
            }
        }
    }

    for (out_max, out_min, left, right) in EXTREMES {
        match (pool.get(left), pool.get(right)) {
            (Some(a), Some(b)) => {
                let maxes: Vec<Option<f64>> = (0..n).map(|i| null_max(a[i], b[i])).collect();
                let mins: Vec<Option<f64>> = (0..n).map(|i| null_min(a[i], b[i])).collect();
                order.push((out_max.to_string(), maxes));
                order.push((out_min.to_string(), mins));
            }
            _ => {
                debug!("Skipping extremes {}/{}: inputs not present", out_max, out_min);
                skipped += 1;
            }
        }
    }

    let mut df = df;
    let added = order.len();
    for (name, values) in order {
        df.with_column(Series::new(name.as_str().into(), values))
            .map_err(|e| ChurnError::DataShape(e.to_string()))?;
    }
    info!(
        "Intra-month features: {} columns added, {} catalog entries skipped",
        added, skipped
    );
    Ok(df)
}
