/// Free parameters of the sp3d5s* nearest-neighbour model, in vector order.
///
/// On-site energies come first, followed by the two-center integrals. Names are the
/// element tags used in the parameter database.
pub const SP3D5S_STAR_PARAMETERS: [&str; 27] = [
    "E_s_a",
    "E_s_c",
    "E_p_a",
    "E_p_c",
    "E_d",
    "E_sstar",
    "ss_sigma",
    "sstar_sstar_sigma",
    "sa_star_sc_sigma",
    "sa_sc_star_sigma",
    "sa_pc_sigma",
    "sc_pa_sigma",
    "sa_star_pc_sigma",
    "sc_star_pa_sigma",
    "sa_dc_sigma",
    "sc_da_sigma",
    "sa_star_dc_sigma",
    "sc_star_da_sigma",
    "pp_sigma",
    "pp_pi",
    "pa_dc_sigma",
    "pc_da_sigma",
    "pa_dc_pi",
    "pc_da_pi",
    "dd_sigma",
    "dd_pi",
    "dd_delta",
];

pub fn default_parameter_names() -> Vec<String> {
    SP3D5S_STAR_PARAMETERS.iter().map(|s| s.to_string()).collect()
}
